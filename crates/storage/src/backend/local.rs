//! Local filesystem storage backend.

use super::BlobStream;
use crate::error::{Error, ErrorKind, Result};
use crate::{FileInfo, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use std::ffi::OsStr;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

/// Suffix of the staging files `write` renames into place.
const STAGING_SUFFIX: &str = ".partial";

fn is_staging(name: &OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.') && name.ends_with(STAGING_SUFFIX))
}

/// Blobs as plain files under a root directory, through `tokio::fs`.
///
/// Writes go to a hidden staging file next to the target and are renamed
/// into place, so a crash mid-write never leaves a truncated entry body
/// behind. Deletes remove directories they leave empty.
///
/// # Examples
///
/// ```no_run
/// use shelter_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/cache/shelter")?;
/// # Ok(())
/// # }
/// ```
pub struct LocalBackend {
    name: String,
    root: PathBuf,
    staged: AtomicU64,
}

impl LocalBackend {
    /// Open (creating if needed) the directory `root`, which must be absolute.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        // Once, at startup: not worth an async constructor.
        std::fs::create_dir_all(root).map_err(|source| ErrorKind::io(root, source))?;
        if !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        Ok(Self {
            name: name.into(),
            root: root.to_path_buf(),
            staged: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    fn staging_path(&self, target: &Path) -> PathBuf {
        let name = target.file_name().map(OsStr::to_string_lossy).unwrap_or_default();
        let n = self.staged.fetch_add(1, Ordering::Relaxed);
        target.with_file_name(format!(".{name}.{n}{STAGING_SUFFIX}"))
    }

    /// Remove directories left empty by a delete, stopping at the root.
    async fn prune_empty_parents(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir.filter(|dir| *dir != self.root.as_path() && dir.starts_with(&self.root)) {
            // Fails as soon as a directory still has children.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> BlobStream<'a> {
        let start = match prefix.map(validate_path).transpose() {
            Ok(start) => start.unwrap_or_default(),
            Err(err) => return Box::pin(futures::stream::once(async { Err(err) })),
        };
        Box::pin(stream! {
            // Relative directories still to visit.
            let mut pending = vec![start];
            while let Some(relative) = pending.pop() {
                let dir = self.root.join(&relative);
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(err) if matches!(err.kind(), IoErrorKind::NotFound | IoErrorKind::NotADirectory) => continue,
                    Err(err) => {
                        yield Err(Error::from(ErrorKind::io(&relative, err)));
                        continue;
                    },
                };
                loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(Error::from(ErrorKind::io(&relative, err)));
                            break;
                        },
                    };
                    let path = relative.join(entry.file_name());
                    match entry.metadata().await {
                        Ok(meta) if meta.is_dir() => pending.push(path),
                        Ok(meta) if meta.is_file() && !is_staging(&entry.file_name()) => {
                            yield Ok(FileInfo::new(path, meta.len()));
                        },
                        // Staging files, sockets, dangling links.
                        Ok(_) => {},
                        // Deleted between listing and stat.
                        Err(err) if err.kind() == IoErrorKind::NotFound => {},
                        Err(err) => yield Err(Error::from(ErrorKind::io(&path, err))),
                    }
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await.map_err(|source| ErrorKind::io(path, source))?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        Ok(fs::read(&target).await.map_err(|source| ErrorKind::io(path, source))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|source| ErrorKind::io(path, source))?;
        }
        let staging = self.staging_path(&target);
        fs::write(&staging, data).await.map_err(|source| ErrorKind::io(path, source))?;
        if let Err(source) = fs::rename(&staging, &target).await {
            if let Err(err) = fs::remove_file(&staging).await {
                tracing::warn!(backend = %self.name, path = %staging.display(), error = %err, "Failed to remove staging file");
            }
            exn::bail!(ErrorKind::io(path, source));
        }
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        fs::remove_file(&target).await.map_err(|source| ErrorKind::io(path, source))?;
        self.prune_empty_parents(target.parent()).await;
        Ok(())
    }
}
