use async_trait::async_trait;
use uuid::Uuid;

use slicer_core::models::{Image, Slice};
use slicer_core::AppError;

/// Operations the proxy and the ingestion lifecycle require from the
/// metadata store.
///
/// Implementations must be safe under concurrent access; the proxy shares
/// one instance process-wide behind an `Arc`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fresh, globally unique identifier.
    fn generate_id(&self) -> Uuid;

    /// Load an image with its original slice attached.
    ///
    /// Fails with `NotFound` for unknown images, and for unpublished ones
    /// when `only_published` is set.
    async fn get_image_by_id(&self, id: Uuid, only_published: bool) -> Result<Image, AppError>;

    /// As `get_image_by_id`, plus all active slices.
    async fn get_image_with_slices_by_id(
        &self,
        id: Uuid,
        only_published: bool,
    ) -> Result<Image, AppError>;

    /// Returns an `active` slice or `NotFound`.
    async fn get_slice_by_image_id_and_filename(
        &self,
        image_id: Uuid,
        filename: &str,
    ) -> Result<Slice, AppError>;

    /// Atomic transactional insert of an image together with its original
    /// slice. Used by the ingestion pipeline.
    async fn create_image_with_original_slice(
        &self,
        image: &Image,
        slice: &Slice,
    ) -> Result<(), AppError>;

    /// Insert a derivative slice. Enforces unique `(image_id, filename)`
    /// among active slices.
    async fn create_slice(&self, slice: &Slice) -> Result<Uuid, AppError>;

    async fn depublish_image(&self, id: Uuid) -> Result<(), AppError>;

    /// Transactional removal of an image and all its slice records. Storage
    /// cleanup is the caller's (best-effort) concern.
    async fn remove_image_with_all_slices(&self, id: Uuid) -> Result<(), AppError>;

    /// Bring the schema up to date.
    async fn migrate(&self) -> Result<(), AppError>;
}
