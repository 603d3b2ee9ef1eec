//! Metadata registry for images and their slices.
//!
//! The registry owns the `(image_id, filename)` uniqueness guarantee for
//! active slices, which is what serializes concurrent writers racing to
//! persist the same derivative.

mod pg;
mod registry;

pub use pg::PgRegistry;
pub use registry::Registry;
