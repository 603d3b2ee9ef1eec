use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::keys::object_key;
use crate::traits::{ByteStream, Storage, StorageError, StorageItem, StorageResult};

/// Local filesystem storage, used for development and tests.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// # Arguments
    /// * `base_path` - root directory for slice storage
    /// * `base_url` - base URL the host serves that directory under
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Converts a storage key to a filesystem path, rejecting traversal.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.starts_with('/') || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.base_path.join(key))
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(
        &self,
        namespace: &str,
        filename: &str,
        data: Bytes,
    ) -> StorageResult<StorageItem> {
        let key = object_key(namespace, filename);
        let path = self.key_to_path(&key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "local storage create failed");
            StorageError::UploadFailed(format!("failed to create file {}: {}", path.display(), e))
        })?;

        file.write_all(&data).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "local storage write failed");
            StorageError::UploadFailed(format!("failed to write file {}: {}", path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "local storage put successful"
        );

        Ok(StorageItem {
            url: self.generate_url(&key),
            path: key,
        })
    }

    async fn download(&self, namespace: &str, filename: &str) -> StorageResult<Vec<u8>> {
        let key = object_key(namespace, filename);
        let path = self.key_to_path(&key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key));
        }

        fs::read(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "local storage read failed");
            StorageError::DownloadFailed(format!("failed to read file {}: {}", path.display(), e))
        })
    }

    async fn download_stream(&self, namespace: &str, filename: &str) -> StorageResult<ByteStream> {
        let key = object_key(namespace, filename);
        let path = self.key_to_path(&key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("failed to open file {}: {}", path.display(), e))
        })?;

        let stream = tokio_util::io::ReaderStream::new(file).map(|chunk| {
            chunk.map_err(|e| StorageError::DownloadFailed(format!("failed to read chunk: {}", e)))
        });

        Ok(Box::pin(stream))
    }

    async fn remove(&self, namespace: &str, filename: &str) -> StorageResult<()> {
        let key = object_key(namespace, filename);
        let path = self.key_to_path(&key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            tracing::error!(path = %path.display(), key = %key, error = %e, "local storage delete failed");
            StorageError::DeleteFailed(format!("failed to delete file {}: {}", path.display(), e))
        })
    }
}
