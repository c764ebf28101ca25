//! Keyed response cache.
//!
//! This module provides a resource-agnostic cache that:
//! - Keys entries by resource namespace plus stable, order-independent filters
//! - Tracks status, freshness and the last error per key
//! - Keeps stale values visible while they are revalidated
//! - Optionally persists confirmed values for an offline start

mod entry;
mod key;
mod storage;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use key::CacheKey;
pub use storage::{CacheStorage, NoopStorage, PersistedEntry, SqliteStorage};
pub use store::CacheStore;
