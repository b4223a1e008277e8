//! Request routing and the fetch strategies behind each route.
//!
//! | Route         | Strategy                                              | Unresolvable     |
//! |---------------|-------------------------------------------------------|------------------|
//! | `Passthrough` | network only                                          | `503`            |
//! | `RangeMedia`  | full entry cache-first, then cut the requested range  | `503`            |
//! | `Navigate`    | network-first, then own entry, then the index         | offline page     |
//! | `StaticAsset` | cache-first, write-through                            | `404`            |
//! | `Other`       | stale-while-revalidate                                | `503`            |
//!
//! Nothing is retried. A strategy either finds something to serve or
//! degrades to the synthetic response in the last column.

use crate::gateway::Gateway;
use crate::message::{Request, Response};
use crate::range::{ByteRange, synthesize};
use derive_more::Display;
use http::{Method, StatusCode};
use shelter_cache::CachedEntry;
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::Instrument;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Anything but `GET`: never cached.
    #[display("passthrough")]
    Passthrough,
    /// A `GET` carrying a `Range` header.
    #[display("range-media")]
    RangeMedia,
    /// A top-level document load.
    #[display("navigate")]
    Navigate,
    /// A manifest entry.
    #[display("static-asset")]
    StaticAsset,
    #[display("other")]
    Other,
}

/// Pick the route for a request whose canonical key is `key`.
///
/// The first matching rule wins: method, then `Range` header, then
/// navigation mode, then manifest membership.
pub fn classify(request: &Request, key: &str, manifest: &HashSet<String>) -> Route {
    if request.method != Method::GET {
        Route::Passthrough
    } else if request.range().is_some() {
        Route::RangeMedia
    } else if request.is_navigation() {
        Route::Navigate
    } else if manifest.contains(key) {
        Route::StaticAsset
    } else {
        Route::Other
    }
}

/// Outcome of resolving the full body behind a range request.
enum FullBody {
    Entry(CachedEntry),
    /// The origin answered, but not with something worth slicing.
    Proxied(Response),
    Unavailable,
}

impl Gateway {
    pub(crate) async fn passthrough(&self, request: &Request) -> Response {
        match self.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "Passthrough request failed");
                Response::synthetic(StatusCode::SERVICE_UNAVAILABLE)
            },
        }
    }

    pub(crate) async fn network_first(&self, request: &Request, key: &str) -> Response {
        let err = match self.fetch(request).await {
            Ok(response) => {
                if self.config().navigation.refresh_cache {
                    self.store(key, &response).await;
                }
                return response;
            },
            Err(err) => err,
        };
        tracing::warn!(key, error = %err, "Navigation failed; falling back to cache");
        if let Some(entry) = self.cached(key).await {
            return entry.into();
        }
        if key != self.index_key()
            && let Some(entry) = self.cached(self.index_key()).await
        {
            tracing::debug!(key, index = self.index_key(), "Serving cached index");
            return entry.into();
        }
        self.offline_page(key)
    }

    pub(crate) async fn cache_first(&self, request: &Request, key: &str) -> Response {
        if let Some(entry) = self.cached(key).await {
            return entry.into();
        }
        match self.fetch(request).await {
            Ok(response) => {
                self.store(key, &response).await;
                response
            },
            Err(err) => {
                tracing::warn!(key, error = %err, "Static asset is neither cached nor reachable");
                Response::synthetic(StatusCode::NOT_FOUND)
            },
        }
    }

    pub(crate) async fn range_media(&self, request: &Request, key: &str) -> Response {
        let entry = match self.full_body(request, key).await {
            FullBody::Entry(entry) => entry,
            FullBody::Proxied(response) => return response,
            FullBody::Unavailable => return Response::synthetic(StatusCode::SERVICE_UNAVAILABLE),
        };
        let range = ByteRange::from_header(request.range());
        tracing::debug!(key, ?range, size = entry.size(), "Synthesizing partial response");
        synthesize(&entry, range, self.fallback_content_type())
    }

    /// The whole resource behind a range request, asking the network for
    /// all of it when it isn't cached.
    async fn full_body(&self, request: &Request, key: &str) -> FullBody {
        if let Some(entry) = self.cached(key).await {
            return FullBody::Entry(entry);
        }
        match self.fetch(&request.without_range()).await {
            Ok(response) if response.is_cacheable() => {
                self.store(key, &response).await;
                FullBody::Entry(response.into_entry())
            },
            Ok(response) => FullBody::Proxied(response),
            Err(err) => {
                tracing::warn!(key, error = %err, "Media is neither cached nor reachable");
                FullBody::Unavailable
            },
        }
    }

    pub(crate) async fn stale_while_revalidate(&self, request: &Request, key: &str) -> Response {
        let refresh = self.revalidate(request.clone(), key.to_string());
        if let Some(entry) = self.cached(key).await {
            // The refresh keeps running in the background.
            return entry.into();
        }
        match refresh.await {
            Ok(Some(response)) => response,
            Ok(None) => Response::synthetic(StatusCode::SERVICE_UNAVAILABLE),
            Err(err) => {
                tracing::warn!(key, error = %err, "Revalidation task failed");
                Response::synthetic(StatusCode::SERVICE_UNAVAILABLE)
            },
        }
    }

    /// Fetch `request` on a tracked task, storing a successful same-origin
    /// response under `key`. Resolves to `None` if the network was
    /// unreachable.
    fn revalidate(&self, request: Request, key: String) -> JoinHandle<Option<Response>> {
        let gateway = self.clone();
        let span = tracing::debug_span!("revalidate", key = %key);
        self.tasks().spawn(
            async move {
                match gateway.fetch(&request).await {
                    Ok(response) => {
                        if gateway.normalizer().is_same_origin(&request.url) {
                            gateway.store(&key, &response).await;
                        }
                        Some(response)
                    },
                    Err(err) => {
                        tracing::debug!(error = %err, "Revalidation failed");
                        None
                    },
                }
            }
            .instrument(span),
        )
    }
}
