//! In-memory storage backend for tests.

use super::BlobStream;
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, validate_path};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Blobs in a sorted map, with a write counter and a failure switch.
///
/// [`set_failing`](Self::set_failing) makes every operation return
/// [`Unavailable`](ErrorKind::Unavailable) until it is switched back, which is
/// how callers test that a broken store degrades to cache misses.
///
/// # Examples
///
/// ```
/// use shelter_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("v1/generation.json", "{}")]);
/// backend.write(Path::new("v1/entries/a.body"), b"beep").await?;
/// assert_eq!(backend.writes(), 1);
///
/// backend.set_failing(true);
/// assert!(backend.exists(Path::new("v1/generation.json")).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    blobs: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MockBackend {
    /// Seed the backend with blobs. Seeding doesn't count as writes.
    ///
    /// # Panics
    ///
    /// If a path isn't canonical.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let blobs = files
            .into_iter()
            .map(|(path, data)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(path) => (path, data.into()),
                    Err(_) => panic!("cannot seed mock backend with invalid path {}", path.display()),
                }
            })
            .collect();
        Self {
            name: "mock".to_string(),
            blobs: RwLock::new(blobs),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    /// Make every operation fail (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Validate `path`, unless the backend is switched to failing.
    fn check(&self, path: &Path) -> Result<PathBuf> {
        if self.failing.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unavailable(format!("{} is switched off", self.name)));
        }
        validate_path(path)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(Vec::<(PathBuf, Vec<u8>)>::new())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> BlobStream<'a> {
        let prefix = match prefix.map(|prefix| self.check(prefix)).transpose() {
            Ok(prefix) => prefix,
            Err(err) => return Box::pin(futures::stream::once(async { Err(err) })),
        };
        if prefix.is_none() && self.failing.load(Ordering::SeqCst) {
            let err = exn::Exn::from(ErrorKind::Unavailable(format!("{} is switched off", self.name)));
            return Box::pin(futures::stream::once(async { Err(err) }));
        }
        Box::pin(async_stream::stream! {
            // Copied out so no lock is held while the consumer awaits.
            let listed: Vec<FileInfo> = self
                .blobs
                .read()
                .await
                .iter()
                .filter(|(path, _)| prefix.as_ref().is_none_or(|prefix| path.starts_with(prefix)))
                .map(|(path, data)| FileInfo::new(path.clone(), data.len() as u64))
                .collect();
            for file in listed {
                yield Ok(file);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = self.check(path)?;
        Ok(self.blobs.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.check(path)?;
        match self.blobs.read().await.get(&path) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = self.check(path)?;
        self.blobs.write().await.insert(path, data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = self.check(path)?;
        if self.blobs.write().await.remove(&path).is_none() {
            exn::bail!(ErrorKind::NotFound(path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_blobs_are_not_writes() {
        let backend = MockBackend::with_files([("v1/a.body", "a"), ("v2/b.body", "b")]);
        assert!(backend.exists(Path::new("v1/a.body")).await.unwrap());
        assert_eq!(backend.len().await, 2);
        assert_eq!(backend.writes(), 0);
        backend.write(Path::new("v1/a.body"), b"again").await.unwrap();
        assert_eq!(backend.read(Path::new("v1/a.body")).await.unwrap(), b"again");
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_missing_blobs() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("a.body")).await.unwrap_err().is_not_found());
        assert!(backend.delete(Path::new("a.body")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_listing_is_sorted_and_prefix_is_a_directory() {
        let backend = MockBackend::with_files([
            ("app-v10/generation.json", "{}"),
            ("app-v1/generation.json", "{}"),
            ("app-v1/entries/a.json", "{}"),
        ]);
        let all: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|file| file.path).collect();
        assert_eq!(
            all,
            vec![
                PathBuf::from("app-v1/entries/a.json"),
                PathBuf::from("app-v1/generation.json"),
                PathBuf::from("app-v10/generation.json"),
            ]
        );
        assert_eq!(backend.list(Some(Path::new("app-v1"))).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_switch() {
        let backend = MockBackend::with_files([("v1/a.body", "a")]);
        backend.set_failing(true);
        let err = backend.read(Path::new("v1/a.body")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unavailable(_)));
        assert!(err.is_retryable());
        assert!(backend.write(Path::new("v1/b.body"), b"b").await.is_err());
        assert!(backend.list(None).await.is_err());
        assert!(backend.list(Some(Path::new("v1"))).await.is_err());
        backend.set_failing(false);
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("../etc/passwd")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
        assert!(backend.write(Path::new("/abs"), b"x").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_seeding_rejects_invalid_paths() {
        MockBackend::with_files([("../escape", "x")]);
    }
}
