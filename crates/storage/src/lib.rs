//! Durable blob storage for the shelter cache.
//!
//! The cache never touches the filesystem itself. It stores opaque blobs at
//! canonical relative paths through a [`StorageBackend`]:
//! [`LocalBackend`](backend::LocalBackend) on disk, or `MockBackend` in
//! memory (behind the `mock` feature).

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
