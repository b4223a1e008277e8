//! Versioned response cache.
//!
//! This crate persists HTTP responses into named *generations* on top of a
//! [`shelter_storage`] blob store. A generation is one snapshot of the
//! offline cache (e.g. `contador-cache-v2`); the gateway only ever reads and
//! writes the current one and deletes the rest on activation.
//!
//! # Architecture
//! - [`CacheStorage`] is the registry of generations. Opening a generation is
//!   idempotent: the same [`Arc`](std::sync::Arc) comes back for the lifetime
//!   of the process.
//! - [`Generation`] maps canonical keys to [`CachedEntry`] values. Entries are
//!   replaced wholesale, never patched; the last write wins.
//!
//! The cache is not the source of truth. Deleting a generation only means the
//! next install has to fetch everything again.

mod entry;
pub mod error;
mod generation;
mod name;
mod storage;

pub use crate::entry::CachedEntry;
pub use crate::generation::{Generation, LookupOptions, strip_query};
pub use crate::name::GenerationName;
pub use crate::storage::{CacheStorage, CleanupScope};
