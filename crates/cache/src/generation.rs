use crate::entry::{CachedEntry, EntryRow};
use crate::error::{ErrorKind, Result};
use crate::name::GenerationName;
use exn::ResultExt;
use shelter_storage::BackendHandle;
use shelter_storage::error::ErrorKind as StorageErrorKind;
use std::path::{Path, PathBuf};
use tracing::instrument;

const ENTRIES_DIR: &str = "entries";
const ENTRY_EXTENSION: &str = "entry";
const KEY_EXTENSION: &str = "key";

/// Options for [`Generation::lookup`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LookupOptions {
    /// Compare keys without their `?query` suffix.
    pub ignore_query: bool,
}

/// Removes a `?query` suffix from a canonical key.
///
/// ```
/// assert_eq!(shelter_cache::strip_query("/app/index.html?v=2"), "/app/index.html");
/// assert_eq!(shelter_cache::strip_query("/app/index.html"), "/app/index.html");
/// ```
pub fn strip_query(key: &str) -> &str {
    key.split_once('?').map_or(key, |(path, _)| path)
}

/// One generation of the cache: a mapping from canonical key to
/// [`CachedEntry`].
///
/// Entries live under `{generation}/entries/`, named after the BLAKE3 hash
/// of the key. `{hash}.entry` holds the metadata row and the body in one
/// blob, so a put is a single replace and concurrent puts of one key leave
/// exactly one of them behind. `{hash}.key` holds the bare key, letting
/// [`keys`](Self::keys) enumerate entries without reading their bodies.
pub struct Generation {
    name: GenerationName,
    backend: BackendHandle,
}

impl Generation {
    pub(crate) fn new(name: GenerationName, backend: BackendHandle) -> Self {
        Self { name, backend }
    }

    pub fn name(&self) -> &GenerationName {
        &self.name
    }

    fn entries_dir(&self) -> PathBuf {
        Path::new(self.name.as_str()).join(ENTRIES_DIR)
    }

    fn entry_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        let dir = self.entries_dir();
        (
            dir.join(format!("{hash}.{ENTRY_EXTENSION}")),
            dir.join(format!("{hash}.{KEY_EXTENSION}")),
        )
    }

    /// Look up an entry by canonical key.
    ///
    /// With [`ignore_query`](LookupOptions::ignore_query), the query-less key
    /// is tried directly first and then every stored key is compared with its
    /// query removed.
    #[instrument(skip(self), fields(generation = %self.name))]
    pub async fn lookup(&self, key: &str, options: LookupOptions) -> Result<Option<CachedEntry>> {
        if !options.ignore_query {
            return self.get(key).await;
        }
        let wanted = strip_query(key);
        if let Some(entry) = self.get(wanted).await? {
            return Ok(Some(entry));
        }
        for stored in self.keys().await? {
            if stored != wanted && strip_query(&stored) == wanted {
                return self.get(&stored).await;
            }
        }
        Ok(None)
    }

    /// Direct lookup of an exact canonical key.
    pub async fn get(&self, key: &str) -> Result<Option<CachedEntry>> {
        let (entry_path, _) = self.entry_paths(key);
        let Some(blob) = self.read_optional(&entry_path).await? else {
            return Ok(None);
        };
        let (row, body) = match EntryRow::decode(blob) {
            Ok((row, body)) if row.key == key => (row, body),
            Ok(_) | Err(_) => {
                tracing::warn!(generation = %self.name, key, "Ignoring unreadable cache entry");
                return Ok(None);
            },
        };
        if body.len() as u64 != row.size {
            tracing::warn!(
                generation = %self.name,
                key,
                expected = row.size,
                actual = body.len(),
                "Cache entry body size mismatch; treating as absent"
            );
            return Ok(None);
        }
        match row.into_entry(body) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                tracing::warn!(generation = %self.name, key, error = %err, "Ignoring corrupt cache entry");
                Ok(None)
            },
        }
    }

    /// Store an entry, replacing whatever was stored under `key`.
    ///
    /// The key blob goes first: its contents only depend on the key, so
    /// racing puts write identical bytes there. The entry blob is the commit.
    #[instrument(skip(self, entry), fields(generation = %self.name, size = entry.size()))]
    pub async fn put(&self, key: &str, entry: &CachedEntry) -> Result<()> {
        let (entry_path, key_path) = self.entry_paths(key);
        let blob = EntryRow::new(key, entry).encode(&entry.body)?;
        self.backend.write(&key_path, key.as_bytes()).await.or_raise(|| ErrorKind::Storage)?;
        self.backend.write(&entry_path, &blob).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(generation = %self.name, key, "Stored cache entry");
        Ok(())
    }

    /// Remove an entry. Returns `false` if nothing was stored under `key`.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let (entry_path, key_path) = self.entry_paths(key);
        let existed = self.delete_optional(&entry_path).await?;
        self.delete_optional(&key_path).await?;
        Ok(existed)
    }

    /// Every canonical key with a stored entry, sorted.
    ///
    /// Linear in the number of entries. Offline manifests hold tens of
    /// entries, not thousands.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let dir = self.entries_dir();
        let files = self.backend.list(Some(dir.as_path())).await.or_raise(|| ErrorKind::Storage)?;
        let mut keys = Vec::new();
        for file in files {
            if file.path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(key) = self.stored_key(&file.path).await? {
                keys.push(key);
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Key of the entry blob at `entry_path`, from its key blob or, failing
    /// that, from the row inside the entry itself.
    async fn stored_key(&self, entry_path: &Path) -> Result<Option<String>> {
        if let Some(key) = self.read_optional(&entry_path.with_extension(KEY_EXTENSION)).await?
            && let Ok(key) = String::from_utf8(key)
        {
            return Ok(Some(key));
        }
        // Deleted between listing and reading.
        let Some(blob) = self.read_optional(entry_path).await? else {
            return Ok(None);
        };
        match EntryRow::decode(blob) {
            Ok((row, _)) => Ok(Some(row.key)),
            Err(_) => {
                tracing::warn!(generation = %self.name, path = %entry_path.display(), "Skipping unreadable cache entry");
                Ok(None)
            },
        }
    }

    async fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.backend.read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Storage),
        }
    }

    async fn delete_optional(&self, path: &Path) -> Result<bool> {
        match self.backend.delete(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err).or_raise(|| ErrorKind::Storage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use shelter_storage::StorageBackend;
    use shelter_storage::backend::MockBackend;
    use std::sync::Arc;

    fn generation(backend: Arc<MockBackend>) -> Generation {
        Generation::new("app-v1".parse().unwrap(), backend)
    }

    fn entry(body: &'static [u8]) -> CachedEntry {
        CachedEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let generation = generation(Arc::new(MockBackend::default()));
        generation.put("/app/beep.mp3", &entry(b"beep")).await.unwrap();
        let found = generation.get("/app/beep.mp3").await.unwrap().unwrap();
        assert_eq!(found.body, Bytes::from_static(b"beep"));
        assert!(generation.get("/app/other.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let generation = generation(Arc::new(MockBackend::default()));
        generation.put("/a", &entry(b"first")).await.unwrap();
        generation.put("/a", &entry(b"second")).await.unwrap();
        assert_eq!(generation.get("/a").await.unwrap().unwrap().body, Bytes::from_static(b"second"));
        assert_eq!(generation.keys().await.unwrap(), vec!["/a".to_string()]);
    }

    #[tokio::test]
    async fn test_lookup_ignoring_query() {
        let generation = generation(Arc::new(MockBackend::default()));
        generation.put("/app/index.html?v=1", &entry(b"index")).await.unwrap();
        let strict = LookupOptions::default();
        let loose = LookupOptions { ignore_query: true };
        assert!(generation.lookup("/app/index.html", strict).await.unwrap().is_none());
        assert!(generation.lookup("/app/index.html?v=2", strict).await.unwrap().is_none());
        assert!(generation.lookup("/app/index.html", loose).await.unwrap().is_some());
        assert!(generation.lookup("/app/index.html?v=2", loose).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_interrupted_put_is_absent() {
        let backend = Arc::new(MockBackend::default());
        let generation = generation(backend.clone());
        // The key blob landed, the entry blob never did.
        let (_, key_path) = generation.entry_paths("/a");
        backend.write(&key_path, b"/a").await.unwrap();
        assert!(generation.get("/a").await.unwrap().is_none());
        assert!(generation.keys().await.unwrap().is_empty());
        assert!(!generation.delete("/a").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_truncated_entry_is_absent() {
        let backend = Arc::new(MockBackend::default());
        let generation = generation(backend.clone());
        generation.put("/a", &entry(b"data")).await.unwrap();
        let (entry_path, _) = generation.entry_paths("/a");
        let mut blob = backend.read(&entry_path).await.unwrap();
        blob.truncate(blob.len() - 2);
        backend.write(&entry_path, &blob).await.unwrap();
        assert!(generation.get("/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_without_key_blob() {
        let backend = Arc::new(MockBackend::default());
        let generation = generation(backend.clone());
        generation.put("/app/a.mp3", &entry(b"a")).await.unwrap();
        let (_, key_path) = generation.entry_paths("/app/a.mp3");
        backend.delete(&key_path).await.unwrap();
        assert_eq!(generation.keys().await.unwrap(), vec!["/app/a.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = Arc::new(MockBackend::default());
        let generation = generation(backend.clone());
        generation.put("/a", &entry(b"data")).await.unwrap();
        assert!(generation.delete("/a").await.unwrap());
        assert!(!generation.delete("/a").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_leave_one_whole_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(shelter_storage::backend::LocalBackend::new("local", temp_dir.path()).unwrap());
        let generation = Arc::new(Generation::new("app-v1".parse().unwrap(), backend));
        let tagged = |tag: &'static str, body: &'static [u8]| {
            let mut headers = HeaderMap::new();
            headers.insert("x-tag", http::HeaderValue::from_static(tag));
            CachedEntry::new(StatusCode::OK, headers, Bytes::from_static(body))
        };
        for _ in 0..200 {
            let tasks = [tagged("a", b"AAAA"), tagged("b", b"BBBBBBBB")].map(|entry| {
                let generation = generation.clone();
                tokio::spawn(async move { generation.put("/k", &entry).await })
            });
            for task in tasks {
                task.await.unwrap().unwrap();
            }
            let found = generation.get("/k").await.unwrap().expect("entry vanished after concurrent puts");
            match found.headers["x-tag"].to_str().unwrap() {
                "a" => assert_eq!(found.body, Bytes::from_static(b"AAAA")),
                "b" => assert_eq!(found.body, Bytes::from_static(b"BBBBBBBB")),
                other => panic!("unexpected tag {other}"),
            }
        }
        assert_eq!(generation.keys().await.unwrap(), vec!["/k".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_are_scoped_to_generation() {
        let backend = Arc::new(MockBackend::default());
        let first = generation(backend.clone());
        let second = Generation::new("app-v2".parse().unwrap(), backend.clone());
        first.put("/b", &entry(b"b")).await.unwrap();
        first.put("/a", &entry(b"a")).await.unwrap();
        second.put("/c", &entry(b"c")).await.unwrap();
        assert_eq!(first.keys().await.unwrap(), vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(second.keys().await.unwrap(), vec!["/c".to_string()]);
    }

    #[tokio::test]
    async fn test_local_backend_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(shelter_storage::backend::LocalBackend::new("local", temp_dir.path()).unwrap());
        let generation = Generation::new("app-v1".parse().unwrap(), backend);
        generation.put("/app/a b.mp3", &entry(b"\x00\x01\x02")).await.unwrap();
        let found = generation.get("/app/a b.mp3").await.unwrap().unwrap();
        assert_eq!(found.size(), 3);
        assert_eq!(generation.keys().await.unwrap(), vec!["/app/a b.mp3".to_string()]);
    }
}
