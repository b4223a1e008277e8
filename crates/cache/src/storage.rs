use crate::error::{ErrorKind, Result};
use crate::generation::Generation;
use crate::name::GenerationName;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use shelter_storage::BackendHandle;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::instrument;

/// Marker blob written at the root of every generation.
const MARKER: &str = "generation.json";

#[derive(Debug, Serialize, Deserialize)]
struct MarkerRow {
    name: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

/// Which generations [`CacheStorage::delete_generations_except`] may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupScope {
    /// Every generation other than the current one.
    All,
    /// Only generations named `{prefix}-*`, leaving other cache consumers
    /// sharing the same blob store alone.
    Prefix(String),
}
impl CleanupScope {
    fn covers(&self, name: &GenerationName) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => name.has_prefix(prefix),
        }
    }
}

/// Registry of cache generations persisted in one blob store.
///
/// # Examples
///
/// ```
/// use shelter_cache::{CacheStorage, GenerationName};
/// use shelter_storage::backend::LocalBackend;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let dir = tempfile::tempdir()?;
/// let storage = CacheStorage::new(Arc::new(LocalBackend::new("local", dir.path())?));
/// let name = GenerationName::new("contador-cache", "v2")?;
/// let first = storage.open(&name).await?;
/// let second = storage.open(&name).await?;
/// assert!(Arc::ptr_eq(&first, &second));
/// # Ok(())
/// # }
/// ```
pub struct CacheStorage {
    backend: BackendHandle,
    opened: Mutex<HashMap<GenerationName, Arc<Generation>>>,
}

impl CacheStorage {
    pub fn new(backend: BackendHandle) -> Self {
        Self {
            backend,
            opened: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    fn marker_path(name: &GenerationName) -> PathBuf {
        Path::new(name.as_str()).join(MARKER)
    }

    /// Open (creating if needed) a generation.
    ///
    /// Idempotent: every call with the same name returns the same [`Arc`]
    /// until the generation is deleted.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn open(&self, name: &GenerationName) -> Result<Arc<Generation>> {
        // Held across the marker write so two concurrent opens can't race.
        let mut opened = self.opened.lock().await;
        if let Some(generation) = opened.get(name) {
            return Ok(generation.clone());
        }
        let marker = Self::marker_path(name);
        if !self.backend.exists(&marker).await.or_raise(|| ErrorKind::Storage)? {
            let row = MarkerRow {
                name: name.to_string(),
                created_at: OffsetDateTime::now_utc(),
            };
            let data = serde_json::to_vec(&row).or_raise(|| ErrorKind::InvalidData("generation marker"))?;
            self.backend.write(&marker, &data).await.or_raise(|| ErrorKind::Storage)?;
            tracing::info!(generation = %name, "Created cache generation");
        }
        let generation = Arc::new(Generation::new(name.clone(), self.backend.clone()));
        opened.insert(name.clone(), generation.clone());
        Ok(generation)
    }

    /// Whether a generation exists in the blob store.
    pub async fn has(&self, name: &GenerationName) -> Result<bool> {
        self.backend.exists(&Self::marker_path(name)).await.or_raise(|| ErrorKind::Storage)
    }

    /// Names of all generations in the blob store, sorted.
    pub async fn generations(&self) -> Result<Vec<GenerationName>> {
        let files = self.backend.list(None).await.or_raise(|| ErrorKind::Storage)?;
        let names: BTreeSet<GenerationName> = files
            .iter()
            .filter(|file| file.path.components().count() == 2 && file.path.ends_with(MARKER))
            .filter_map(|file| file.root_component())
            .filter_map(|root| match root.parse() {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(root, "Ignoring generation marker with an invalid name");
                    None
                },
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Delete a whole generation. Returns `false` if it didn't exist.
    ///
    /// Entries are removed before the marker, so a delete interrupted halfway
    /// leaves a generation that is still enumerated and can be deleted again.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &GenerationName) -> Result<bool> {
        self.opened.lock().await.remove(name);
        let marker = Self::marker_path(name);
        let prefix = PathBuf::from(name.as_str());
        let files = self.backend.list(Some(prefix.as_path())).await.or_raise(|| ErrorKind::Storage)?;
        let mut existed = false;
        for file in files {
            if file.path == marker {
                existed = true;
                continue;
            }
            match self.backend.delete(&file.path).await {
                Ok(()) => {},
                Err(err) if err.is_not_found() => {},
                Err(err) => return Err(err).or_raise(|| ErrorKind::Storage),
            }
        }
        if existed {
            match self.backend.delete(&marker).await {
                Ok(()) => {},
                Err(err) if err.is_not_found() => {},
                Err(err) => return Err(err).or_raise(|| ErrorKind::Storage),
            }
            tracing::info!(generation = %name, "Deleted cache generation");
        }
        Ok(existed)
    }

    /// Delete every generation in `scope` except `current`. Irreversible.
    ///
    /// Returns the names that were deleted.
    #[instrument(skip(self))]
    pub async fn delete_generations_except(
        &self,
        current: &GenerationName,
        scope: &CleanupScope,
    ) -> Result<Vec<GenerationName>> {
        let mut deleted = Vec::new();
        for name in self.generations().await? {
            if &name == current || !scope.covers(&name) {
                continue;
            }
            if self.delete(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CachedEntry;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use shelter_storage::backend::MockBackend;

    fn name(s: &str) -> GenerationName {
        s.parse().unwrap()
    }

    async fn seeded(backend: Arc<MockBackend>, names: &[&str]) -> CacheStorage {
        let storage = CacheStorage::new(backend);
        for n in names {
            let generation = storage.open(&name(n)).await.unwrap();
            let entry = CachedEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"x"));
            generation.put("/app/a", &entry).await.unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let backend = Arc::new(MockBackend::default());
        let storage = CacheStorage::new(backend.clone());
        let first = storage.open(&name("app-v1")).await.unwrap();
        let second = storage.open(&name("app-v1")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        // Only the marker was written, once.
        assert_eq!(backend.writes(), 1);
        assert!(storage.has(&name("app-v1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopening_existing_generation_keeps_entries() {
        let backend = Arc::new(MockBackend::default());
        seeded(backend.clone(), &["app-v1"]).await;
        // A new registry (e.g. after a restart) sees the persisted entries.
        let storage = CacheStorage::new(backend);
        let generation = storage.open(&name("app-v1")).await.unwrap();
        assert_eq!(generation.keys().await.unwrap(), vec!["/app/a".to_string()]);
    }

    #[tokio::test]
    async fn test_generations_are_enumerated() {
        let storage = seeded(Arc::new(MockBackend::default()), &["app-v2", "app-v1", "other-v1"]).await;
        assert_eq!(storage.generations().await.unwrap(), vec![name("app-v1"), name("app-v2"), name("other-v1")]);
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let backend = Arc::new(MockBackend::default());
        let storage = seeded(backend.clone(), &["app-v1"]).await;
        assert!(storage.delete(&name("app-v1")).await.unwrap());
        assert!(backend.is_empty().await);
        assert!(!storage.delete(&name("app-v1")).await.unwrap());
        assert!(!storage.has(&name("app-v1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_except_current_with_prefix_scope() {
        let storage = seeded(Arc::new(MockBackend::default()), &["app-v4", "app-v5", "app-v6", "other-v1"]).await;
        let scope = CleanupScope::Prefix("app".to_string());
        let deleted = storage.delete_generations_except(&name("app-v6"), &scope).await.unwrap();
        assert_eq!(deleted, vec![name("app-v4"), name("app-v5")]);
        assert_eq!(storage.generations().await.unwrap(), vec![name("app-v6"), name("other-v1")]);
    }

    #[tokio::test]
    async fn test_prefix_scope_spares_longer_prefixes() {
        let storage = seeded(Arc::new(MockBackend::default()), &["app-v1", "app-v2", "app-cache-v1"]).await;
        let scope = CleanupScope::Prefix("app".to_string());
        let deleted = storage.delete_generations_except(&name("app-v2"), &scope).await.unwrap();
        assert_eq!(deleted, vec![name("app-v1")]);
        assert_eq!(storage.generations().await.unwrap(), vec![name("app-cache-v1"), name("app-v2")]);
    }

    #[tokio::test]
    async fn test_delete_except_current_unscoped() {
        let storage = seeded(Arc::new(MockBackend::default()), &["app-v5", "app-v6", "other-v1"]).await;
        storage.delete_generations_except(&name("app-v6"), &CleanupScope::All).await.unwrap();
        assert_eq!(storage.generations().await.unwrap(), vec![name("app-v6")]);
    }

    #[tokio::test]
    async fn test_deleted_generation_reopens_empty() {
        let storage = seeded(Arc::new(MockBackend::default()), &["app-v1"]).await;
        let before = storage.open(&name("app-v1")).await.unwrap();
        storage.delete(&name("app-v1")).await.unwrap();
        let after = storage.open(&name("app-v1")).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.keys().await.unwrap().is_empty());
    }
}
