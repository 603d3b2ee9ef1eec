//! EXIF orientation handling.
//!
//! JPEG and TIFF sources may carry an orientation tag; it is translated into
//! a synthetic transformation (rotation is clockwise) and applied before the
//! user's transformation so derivatives always start from an upright image.

use std::io::Cursor;

use exif::{In, Tag};

use crate::transformation::{Rotation, Transformation};

/// Maximum distance into the source to look for EXIF tags.
pub(crate) const MAX_EXIF_SCAN: usize = 1 << 20;

/// Read the EXIF orientation tag (1-8) from raw image bytes.
/// Returns 1 (normal) when there is no tag or it cannot be parsed.
pub(crate) fn read_exif_orientation(data: &[u8]) -> u32 {
    let scan = &data[..data.len().min(MAX_EXIF_SCAN)];
    let mut cursor = Cursor::new(scan);

    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(parsed) => parsed
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

/// Translate an EXIF orientation value into the rotation/flip pair that
/// restores the upright image.
pub(crate) fn orientation_transformation(orientation: u32) -> Transformation {
    let mut t = Transformation::default();

    match orientation {
        2 => t.flip.horizontal = true,
        3 => t.rotation = Rotation::R180,
        4 => t.flip.vertical = true,
        5 => {
            t.rotation = Rotation::R270;
            t.flip.horizontal = true;
        }
        6 => t.rotation = Rotation::R90,
        7 => {
            t.rotation = Rotation::R90;
            t.flip.horizontal = true;
        }
        8 => t.rotation = Rotation::R270,
        // 1 is upright, anything else is treated as upright
        _ => {}
    }

    t
}
