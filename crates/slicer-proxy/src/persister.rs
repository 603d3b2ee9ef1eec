//! Fire-and-forget persistence of freshly produced derivatives.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use slicer_core::models::{Slice, SliceStatus};
use slicer_core::AppError;
use slicer_registry::Registry;
use slicer_storage::Storage;

/// Writes a new slice to storage and registers it, detached from the client
/// request. Owns its own timeout so it may outlive the caller.
///
/// Failures never reach the client; the response has already been streamed
/// from the same buffer. A storage failure abandons the registry insert; a
/// registry failure leaves an orphan object in storage for a reaper to
/// collect. Concurrent writers racing on the same derivative are serialized
/// by the registry's unique index, and the loser only logs the conflict.
#[derive(Clone)]
pub struct Persister {
    registry: Arc<dyn Registry>,
    storage: Arc<dyn Storage>,
    timeout: Duration,
}

impl Persister {
    pub fn new(registry: Arc<dyn Registry>, storage: Arc<dyn Storage>, timeout: Duration) -> Self {
        Persister {
            registry,
            storage,
            timeout,
        }
    }

    /// Spawn a detached persistence task for `slice` whose object body is
    /// `body`. Returns immediately.
    pub fn spawn(&self, mut slice: Slice, body: Bytes) {
        let registry = Arc::clone(&self.registry);
        let storage = Arc::clone(&self.storage);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let image_id = slice.image_id;
            let filename = slice.filename.clone();

            let outcome = tokio::time::timeout(timeout, async {
                slice.id = registry.generate_id();
                slice.is_valid = true;
                slice.is_original = false;
                slice.status = SliceStatus::Active;
                slice.created_at = Utc::now();

                let item = storage
                    .put(&slice.namespace, &slice.filename, body)
                    .await
                    .map_err(AppError::from)?;
                slice.path = item.path;

                registry.create_slice(&slice).await?;
                Ok::<_, AppError>(slice.size)
            })
            .await;

            match outcome {
                Ok(Ok(size)) => {
                    tracing::debug!(
                        image_id = %image_id,
                        filename = %filename,
                        size_bytes = size,
                        "slice persisted"
                    );
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        error = %err,
                        image_id = %image_id,
                        filename = %filename,
                        "failed to persist slice"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        image_id = %image_id,
                        filename = %filename,
                        timeout_secs = timeout.as_secs(),
                        "slice persistence timed out"
                    );
                }
            }
        });
    }
}
