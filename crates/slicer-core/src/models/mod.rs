mod extension;
mod image;
mod slice;

pub use extension::Extension;
pub use image::Image;
pub use slice::{compute_slice_filename, compute_slice_path, Slice, SliceStatus};
