//! Derivative cache resolution.

use std::sync::Arc;

use slicer_core::models::{Image, Slice};
use slicer_core::AppError;
use slicer_registry::Registry;

/// Classifies a requested derivative as an exact cache hit or a fallback to
/// the original slice.
///
/// Lookup failures are deliberately swallowed: a degraded registry still
/// serves the original, at the cost of re-transforming on every request.
pub struct CacheResolver {
    registry: Arc<dyn Registry>,
}

impl CacheResolver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        CacheResolver { registry }
    }

    /// Returns the slice to stream and whether it matches the requested
    /// filename exactly. A non-exact result means the caller must transform.
    pub async fn resolve(
        &self,
        image: &Image,
        requested_filename: &str,
    ) -> Result<(Slice, bool), AppError> {
        match self
            .registry
            .get_slice_by_image_id_and_filename(image.id, requested_filename)
            .await
        {
            Ok(slice) => Ok((slice, true)),
            Err(err) => {
                match &err {
                    AppError::NotFound(_) => {
                        tracing::debug!(
                            image_id = %image.id,
                            filename = %requested_filename,
                            "derivative not cached, falling back to original"
                        );
                    }
                    other => {
                        tracing::warn!(
                            error = %other,
                            image_id = %image.id,
                            filename = %requested_filename,
                            "cache lookup failed, falling back to original"
                        );
                    }
                }

                let original = image
                    .original_slice()
                    .ok_or_else(|| {
                        AppError::RegistryFailed(format!(
                            "image {} has no original slice",
                            image.id
                        ))
                    })?
                    .clone();

                let exact = original.filename == requested_filename;
                Ok((original, exact))
            }
        }
    }
}
