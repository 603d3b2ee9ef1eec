//! On-the-fly image derivative proxy with write-through caching.
//!
//! A request names an image, a transformation spec and a target extension.
//! The proxy parses and normalizes the spec, resolves the derivative against
//! the registry, and either streams a cached slice straight from storage or
//! transforms the original on the fly while persisting the new derivative in
//! the background for future requests.

mod api_doc;
pub mod error;
pub mod handlers;
pub mod persister;
pub mod pipeline;
pub mod resolver;
pub mod server;
pub mod state;

pub use pipeline::{ImageProxy, ServedSlice};
pub use resolver::CacheResolver;
pub use state::AppState;
