//! Storage abstraction trait
//!
//! All storage backends (S3, local filesystem) must implement this trait so
//! the proxy can stream slices without coupling to a provider.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use slicer_core::AppError;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    BackendError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("object {}", key)),
            other => AppError::StorageFailed(other.to_string()),
        }
    }
}

/// Result of a successful put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageItem {
    /// Storage key the object landed at: `{namespace}/{filename}`.
    pub path: String,
    /// Publicly resolvable URL for the object.
    pub url: String,
}

/// Byte stream yielded by `download_stream`.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an object under `{namespace}/{filename}`. Creating the
    /// namespace is implicit and idempotent.
    async fn put(&self, namespace: &str, filename: &str, data: Bytes)
        -> StorageResult<StorageItem>;

    /// Fetch a whole object into memory.
    async fn download(&self, namespace: &str, filename: &str) -> StorageResult<Vec<u8>>;

    /// Fetch an object as a chunked stream.
    async fn download_stream(&self, namespace: &str, filename: &str)
        -> StorageResult<ByteStream>;

    /// Delete an object; missing objects are not an error.
    async fn remove(&self, namespace: &str, filename: &str) -> StorageResult<()>;
}
