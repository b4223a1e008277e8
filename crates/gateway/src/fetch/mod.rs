//! The network side of the gateway.
//!
//! The gateway never speaks HTTP itself; a [`Fetcher`] is injected and every
//! request the cache can't (or shouldn't) answer goes through it. By the time
//! a request reaches the fetcher its URL has been resolved to an absolute one
//! against the gateway's scope.

mod mock;

pub use self::mock::MockFetcher;
use crate::error::Result;
use crate::message::{Request, Response};
use async_trait::async_trait;
use std::sync::Arc;

pub type FetcherHandle = Arc<dyn Fetcher + Send + Sync>;

/// Sends requests to the origin.
///
/// Any response the origin produced, including `404` and `500`, is `Ok`. An
/// error means no response arrived at all (offline, DNS, connection reset) and
/// should be raised as [`Unreachable`](crate::error::ErrorKind::Unreachable).
///
/// # Examples
///
/// ```
/// use shelter_gateway::{Fetcher, Request, Response, error::{ErrorKind, Result}};
///
/// struct Offline;
///
/// #[async_trait::async_trait]
/// impl Fetcher for Offline {
///     async fn fetch(&self, request: &Request) -> Result<Response> {
///         exn::bail!(ErrorKind::Unreachable(request.url.clone()))
///     }
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}
