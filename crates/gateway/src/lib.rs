//! Offline-first request gateway.
//!
//! A [`Gateway`] sits between an application and its origin. Every request
//! is classified into a [`Route`](strategy::Route) and answered by that
//! route's strategy from the current cache generation, the network, or a
//! blend of both, so the application keeps working without connectivity.
//! Seekable media is served as `206 Partial Content` cut from fully cached
//! bodies.
//!
//! # Architecture
//! - [`normalize`] maps every spelling of a resource onto one cache key.
//! - [`strategy`] holds the routing table and the fetch strategies.
//! - [`range`] synthesizes partial responses.
//! - [`lifecycle`] installs the manifest into the current generation and
//!   deletes stale generations on activation.
//! - The network is a [`Fetcher`]; persistence is a
//!   [`CacheStorage`](shelter_cache::CacheStorage). Both are injected.

pub mod error;
mod fetch;
mod gateway;
pub mod lifecycle;
mod message;
pub mod normalize;
mod offline;
pub mod range;
pub mod strategy;

pub use crate::fetch::{Fetcher, FetcherHandle, MockFetcher};
pub use crate::gateway::Gateway;
pub use crate::lifecycle::{PopulateReport, WorkerState};
pub use crate::message::{Request, RequestMode, Response};
pub use crate::normalize::{Normalizer, normalize};
