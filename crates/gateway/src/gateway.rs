use crate::error::{ErrorKind, Result};
use crate::fetch::FetcherHandle;
use crate::lifecycle::WorkerState;
use crate::message::{Request, Response};
use crate::normalize::Normalizer;
use crate::offline::OfflinePage;
use crate::strategy::{Route, classify};
use exn::ResultExt;
use http::HeaderValue;
use shelter_cache::{CacheStorage, CachedEntry, CleanupScope, Generation, GenerationName, LookupOptions};
use shelter_config::Config;
use shelter_storage::backend::LocalBackend;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, field, instrument};

/// The offline-first gateway.
///
/// Cheap to clone; clones share the cache, the fetcher, the lifecycle state
/// and the set of background refreshes. Hand one to every request task.
///
/// # Examples
///
/// ```
/// use shelter_config::Config;
/// use shelter_gateway::{Gateway, MockFetcher, Request, Response};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let dir = tempfile::tempdir()?;
/// let mut config = Config::default();
/// config.storage.root = dir.path().to_path_buf();
/// config.manifest = vec!["./".to_string(), "./MYINDEX.html".to_string()];
///
/// let origin = Arc::new(MockFetcher::with_routes([
///     ("http://localhost/", Response::ok("home")),
///     ("http://localhost/MYINDEX.html", Response::ok("index")),
/// ]));
/// let gateway = Gateway::from_config(config, origin.clone())?;
/// gateway.start().await?;
///
/// origin.set_online(false);
/// let response = gateway.handle(Request::navigate("./MYINDEX.html")).await;
/// assert_eq!(response.body, "index");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    normalizer: Normalizer,
    /// Canonical keys of every manifest entry.
    manifest: HashSet<String>,
    index_key: String,
    generation: GenerationName,
    cleanup: CleanupScope,
    fallback_content_type: HeaderValue,
    storage: CacheStorage,
    fetcher: FetcherHandle,
    offline: OfflinePage,
    tasks: TaskTracker,
    state: Mutex<WorkerState>,
}

impl Gateway {
    pub fn new(config: Config, storage: CacheStorage, fetcher: FetcherHandle) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let generation =
            GenerationName::new(&config.cache.prefix, &config.cache.version).or_raise(|| ErrorKind::Config)?;
        let fallback_content_type =
            HeaderValue::from_str(&config.media.fallback_content_type).or_raise(|| ErrorKind::Config)?;
        let normalizer = Normalizer::new(config.scope.clone());
        let manifest = config.manifest.iter().map(|entry| normalizer.normalize(entry)).collect();
        let index_key = normalizer.normalize(&config.index);
        let cleanup = if config.cache.scoped_cleanup {
            CleanupScope::Prefix(config.cache.prefix.clone())
        } else {
            CleanupScope::All
        };
        let offline = OfflinePage::new()?;
        tracing::debug!(generation = %generation, scope = %config.scope, "Created gateway");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                normalizer,
                manifest,
                index_key,
                generation,
                cleanup,
                fallback_content_type,
                storage,
                fetcher,
                offline,
                tasks: TaskTracker::new(),
                state: Mutex::new(WorkerState::Parsed),
            }),
        })
    }

    /// Gateway persisting into a [`LocalBackend`] at `config.storage.root`.
    pub fn from_config(config: Config, fetcher: FetcherHandle) -> Result<Self> {
        let backend = LocalBackend::new("local", &config.storage.root).or_raise(|| ErrorKind::Cache)?;
        Self::new(config, CacheStorage::new(Arc::new(backend)), fetcher)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.inner.storage
    }

    /// Name of the generation this gateway reads and writes.
    pub fn generation_name(&self) -> &GenerationName {
        &self.inner.generation
    }

    pub(crate) fn cleanup_scope(&self) -> &CleanupScope {
        &self.inner.cleanup
    }

    pub(crate) fn index_key(&self) -> &str {
        &self.inner.index_key
    }

    pub(crate) fn fallback_content_type(&self) -> &HeaderValue {
        &self.inner.fallback_content_type
    }

    pub(crate) fn offline_page(&self, key: &str) -> Response {
        self.inner.offline.render(key, self.inner.generation.as_str())
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.inner.tasks
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if the current state is one of `from`.
    pub(crate) fn transition(&self, action: &'static str, from: &[WorkerState], to: WorkerState) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !from.contains(&*state) {
            exn::bail!(ErrorKind::Lifecycle(action, *state));
        }
        tracing::info!(from = %*state, to = %to, "Lifecycle transition");
        *state = to;
        Ok(())
    }

    pub(crate) fn set_state(&self, to: WorkerState) {
        let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(from = %*state, to = %to, "Lifecycle transition");
        *state = to;
    }

    /// The current generation, opened on first use.
    pub async fn current(&self) -> Result<Arc<Generation>> {
        self.inner.storage.open(&self.inner.generation).await.or_raise(|| ErrorKind::Cache)
    }

    /// Answer one request. Never fails: every failure degrades to a cached
    /// fallback or a synthetic response.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url, route = field::Empty, status = field::Empty))]
    pub async fn handle(&self, request: Request) -> Response {
        let key = self.inner.normalizer.normalize(&request.url);
        let route = classify(&request, &key, &self.inner.manifest);
        tracing::Span::current().record("route", field::display(route));
        let response = match route {
            Route::Passthrough => self.passthrough(&request).await,
            Route::RangeMedia => self.range_media(&request, &key).await,
            Route::Navigate => self.network_first(&request, &key).await,
            Route::StaticAsset => self.cache_first(&request, &key).await,
            Route::Other => self.stale_while_revalidate(&request, &key).await,
        };
        tracing::Span::current().record("status", response.status.as_u16());
        tracing::debug!(key = %key, "Resolved request");
        response
    }

    /// Wait for every background refresh spawned so far.
    pub async fn settle(&self) {
        let tasks = &self.inner.tasks;
        tasks.close();
        tasks.wait().await;
        tasks.reopen();
    }

    /// Cached entry for `key` in the current generation.
    ///
    /// Tries the key directly, then compares it against every stored key
    /// after normalizing those too, so entries stored under another spelling
    /// of the same resource still match.
    pub(crate) async fn cached(&self, key: &str) -> Option<CachedEntry> {
        match self.lookup(key).await {
            Ok(found) => {
                tracing::debug!(key, hit = found.is_some(), "Cache lookup");
                found
            },
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache lookup failed; treating as a miss");
                None
            },
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<CachedEntry>> {
        let generation = self.current().await?;
        if let Some(entry) = generation.lookup(key, LookupOptions::default()).await.or_raise(|| ErrorKind::Cache)? {
            return Ok(Some(entry));
        }
        for stored in generation.keys().await.or_raise(|| ErrorKind::Cache)? {
            if stored != key && self.inner.normalizer.normalize(&stored) == key {
                return generation.get(&stored).await.or_raise(|| ErrorKind::Cache);
            }
        }
        Ok(None)
    }

    /// Send `request` to the network with its URL resolved against the scope.
    pub(crate) async fn fetch(&self, request: &Request) -> Result<Response> {
        let resolved = match self.inner.normalizer.resolve(&request.url) {
            Some(url) => request.with_url(url.as_str()),
            None => request.clone(),
        };
        let span = tracing::debug_span!("fetch", url = %resolved.url);
        self.inner.fetcher.fetch(&resolved).instrument(span).await
    }

    /// Write a network response through to the current generation. Only
    /// `200 OK` responses are stored; failures are logged and swallowed.
    pub(crate) async fn store(&self, key: &str, response: &Response) -> bool {
        if !response.is_cacheable() {
            tracing::debug!(key, status = response.status.as_u16(), "Not caching non-success response");
            return false;
        }
        let result = match self.current().await {
            Ok(generation) => generation.put(key, &response.to_entry()).await.or_raise(|| ErrorKind::Cache),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to store response");
                false
            },
        }
    }
}
