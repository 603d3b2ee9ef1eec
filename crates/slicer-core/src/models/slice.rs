use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Extension;

/// Lifecycle state of a slice.
///
/// The synchronous proxy moves a freshly produced slice straight from
/// `Unsaved` to `Active` after the storage put succeeds. `Pending`,
/// `Processing` and `Retrying` are reserved for an asynchronous worker path;
/// read paths only ever serve `Active` slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "slice_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SliceStatus {
    Unsaved,
    Pending,
    Processing,
    Retrying,
    Active,
}

/// A materialized image derivative, including the original upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    pub id: Uuid,
    pub image_id: Uuid,
    pub width: i32,
    pub height: i32,
    pub size: i64,
    /// Jpeg encode quality; 0 means encoder default.
    pub quality: i32,

    /// Cache key: `imageID/<canonical-spec>.<ext>`.
    pub filename: String,
    pub namespace: String,

    /// Storage key: `namespace/filename`.
    pub path: String,

    pub cropped: bool,

    // denormalized for querying
    pub extension: Extension,
    pub mime: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub is_valid: bool,
    pub status: SliceStatus,

    /// The originally uploaded image.
    pub is_original: bool,
}

impl Slice {
    pub fn is_servable(&self) -> bool {
        self.status == SliceStatus::Active && self.is_valid
    }
}

pub fn compute_slice_filename(image_id: Uuid, filename: &str) -> String {
    format!("{}/{}", image_id, filename)
}

pub fn compute_slice_path(namespace: &str, filename: &str) -> String {
    format!("{}/{}", namespace, filename)
}
