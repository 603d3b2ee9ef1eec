//! Core domain types for the slicer image proxy.
//!
//! This crate holds the shared vocabulary of the workspace: the `Image` and
//! `Slice` models, the unified `AppError`, the storage backend selector and
//! the environment-driven configuration. It has no I/O of its own.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::Config;
pub use error::AppError;
pub use storage_types::StorageBackend;
