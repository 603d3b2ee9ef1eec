use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Extension, Slice};

/// A source image and its registered derivative slices.
///
/// Immutable after ingestion except for `publish_at`, `updated_at` and the
/// slice set. The original upload is a designated child slice; children refer
/// back by `image_id` rather than by a live reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub name: String,
    pub original_name: String,
    pub original_ext: Extension,
    pub original_size: i64,
    /// Logical storage partition, maps to an object store prefix.
    pub namespace: String,
    /// None means unpublished.
    pub publish_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub original_slice: Option<Slice>,
    pub slices: Vec<Slice>,
}

impl Image {
    pub fn is_published(&self) -> bool {
        match self.publish_at {
            Some(at) => at <= Utc::now(),
            None => false,
        }
    }

    /// The original slice must exist for any image created through the
    /// ingestion path; absence indicates registry corruption.
    pub fn original_slice(&self) -> Option<&Slice> {
        self.original_slice.as_ref()
    }
}
