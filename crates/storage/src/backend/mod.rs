//! Blob store backends.
//!
//! A backend stores opaque byte blobs at canonical relative paths (see
//! [`validate_path`](crate::validate_path)). It knows nothing about HTTP,
//! generations or entries; the cache layers all of that on top.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub type BlobStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// A durable blob store.
///
/// Every method is a suspension point for the request that triggered it.
/// Implementations validate paths themselves and reject anything that isn't
/// canonical with [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shelter_storage::{backend::StorageBackend, error::Result};
///
/// async fn marker(backend: &dyn StorageBackend, generation: &str) -> Result<Option<Vec<u8>>> {
///     let path = Path::new(generation).join("generation.json");
///     match backend.read(&path).await {
///         Ok(data) => Ok(Some(data)),
///         Err(err) if err.is_not_found() => Ok(None),
///         Err(err) => Err(err),
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Stream every blob below the directory `prefix`, or the whole store.
    ///
    /// The prefix is a directory path, matched by component: `v1` covers
    /// `v1/entries/a.json` but not `v10/generation.json`. A prefix with
    /// nothing under it yields an empty stream. Order is unspecified.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> BlobStream<'a>;

    /// [`list_stream`](Self::list_stream), collected.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read a whole blob; [`NotFound`](crate::error::ErrorKind::NotFound) if
    /// there is none.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Store a blob, creating parent directories and replacing any previous
    /// blob. Readers see either the old or the new contents, never a mix.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Remove a blob; [`NotFound`](crate::error::ErrorKind::NotFound) if
    /// there is none.
    async fn delete(&self, path: &Path) -> Result<()>;
}
