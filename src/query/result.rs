//! Values handed back to query callers.

use tokio::time::Instant;

use crate::cache::{CacheEntry, QueryStatus};
use crate::error::AppError;

/// Result of a successful [`super::QueryClient::query`] call, including where
/// the data came from.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
  pub value: T,
  pub source: CacheSource,
  /// When the value was fetched, if it came from the network in this process
  pub fetched_at: Option<Instant>,
}

impl<T> QueryResult<T> {
  pub fn status(&self) -> QueryStatus {
    QueryStatus::Success
  }
}

/// Indicates where query data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This caller started the network request
  Network,
  /// Attached to a request another caller had already started
  Shared,
  /// Served from cache, still fresh
  CacheFresh,
}

/// Read-only view of a cache entry decoded into `T`.
///
/// During an error the last-known-good value stays in `value`.
#[derive(Debug, Clone)]
pub struct QueryView<T> {
  pub value: Option<T>,
  pub status: QueryStatus,
  pub error: Option<AppError>,
  pub is_stale: bool,
}

impl<T: serde::de::DeserializeOwned> QueryView<T> {
  pub(crate) fn from_entry(entry: &CacheEntry) -> Result<Self, AppError> {
    Ok(Self {
      value: entry.decode()?,
      status: entry.status(),
      error: entry.error().cloned(),
      is_stale: entry.is_stale(Instant::now()),
    })
  }
}
