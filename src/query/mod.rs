//! Async query layer for data fetching with caching support.
//!
//! Inspired by TanStack Query: reads go through a shared [`QueryClient`] that
//! serves fresh data from the cache, collapses concurrent requests for the same
//! key into one, and retries transient failures.

mod client;
mod observer;
mod result;
mod retry;

pub use client::{QueryClient, QueryClientConfig, QueryOptions, Revalidate};
pub use observer::QueryObserver;
pub use result::{CacheSource, QueryResult, QueryView};
pub use retry::RetryPolicy;
