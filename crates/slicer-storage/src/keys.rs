//! Shared key derivation for storage backends.
//!
//! Key format: `{namespace}/{filename}`. The namespace is the image's
//! logical partition; the filename already carries the image id prefix, so a
//! full key reads `gallery/{image_id}/h200_w400.png`.

/// Build the storage key for a slice. All backends must use this format so
/// that `Slice.path` can be recomputed from its parts.
pub fn object_key(namespace: &str, filename: &str) -> String {
    format!("{}/{}", namespace, filename)
}
