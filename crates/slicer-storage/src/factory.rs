use std::sync::Arc;

use slicer_core::{Config, StorageBackend};

use crate::local::LocalStorage;
use crate::s3::S3Storage;
use crate::traits::{Storage, StorageError, StorageResult};

/// Build the configured storage backend. S3 is the default.
pub async fn storage_from_config(cfg: &Config) -> StorageResult<Arc<dyn Storage>> {
    match cfg.storage_backend.unwrap_or(StorageBackend::S3) {
        StorageBackend::S3 => {
            let bucket = cfg
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET is not set".to_string()))?;
            let region = cfg
                .s3_region
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_REGION is not set".to_string()))?;

            tracing::info!(bucket = %bucket, region = %region, "using S3 storage backend");
            Ok(Arc::new(S3Storage::new(
                bucket,
                region,
                cfg.s3_endpoint.clone(),
            )?))
        }
        StorageBackend::Local => {
            let path = cfg.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH is not set".to_string())
            })?;
            let base_url = cfg.local_storage_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_BASE_URL is not set".to_string())
            })?;

            tracing::info!(path = %path, "using local storage backend");
            Ok(Arc::new(LocalStorage::new(path, base_url).await?))
        }
    }
}
