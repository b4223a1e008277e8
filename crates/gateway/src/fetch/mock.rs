//! In-memory origin for tests and demos.

use super::Fetcher;
use crate::error::{ErrorKind, Result};
use crate::message::{Request, Response};
use async_trait::async_trait;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// An origin serving fixed responses keyed by absolute URL.
///
/// Unknown URLs get a `404`. Switching the fetcher offline makes every
/// request fail as unreachable. Every request is recorded, whether or not it
/// was answered.
///
/// # Examples
///
/// ```
/// use shelter_gateway::{Fetcher, MockFetcher, Request, Response};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let origin = MockFetcher::with_routes([("http://localhost/beep.mp3", Response::ok("beep"))]);
/// assert_eq!(origin.fetch(&Request::get("http://localhost/beep.mp3")).await?.body, "beep");
///
/// origin.set_online(false);
/// assert!(origin.fetch(&Request::get("http://localhost/beep.mp3")).await.is_err());
/// assert_eq!(origin.requests().await.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct MockFetcher {
    routes: RwLock<HashMap<String, Response>>,
    requests: RwLock<Vec<Request>>,
    online: AtomicBool,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::with_routes(std::iter::empty::<(String, Response)>())
    }
}

impl MockFetcher {
    pub fn with_routes(routes: impl IntoIterator<Item = (impl Into<String>, Response)>) -> Self {
        Self {
            routes: RwLock::new(routes.into_iter().map(|(url, response)| (url.into(), response)).collect()),
            requests: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Serve `response` for `url`, replacing any previous route.
    pub async fn route(&self, url: impl Into<String>, response: Response) {
        self.routes.write().await.insert(url.into(), response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Every request received so far, oldest first.
    pub async fn requests(&self) -> Vec<Request> {
        self.requests.read().await.clone()
    }

    /// How many requests were made for `url`.
    pub async fn calls_to(&self, url: &str) -> usize {
        self.requests.read().await.iter().filter(|request| request.url == url).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.requests.write().await.push(request.clone());
        if !self.is_online() {
            exn::bail!(ErrorKind::Unreachable(request.url.clone()));
        }
        let response = self.routes.read().await.get(&request.url).cloned();
        Ok(response.unwrap_or_else(|| Response::synthetic(StatusCode::NOT_FOUND)))
    }
}
