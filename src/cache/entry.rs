//! Cache entries and their status.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::AppError;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  Idle,
  Loading,
  Success,
  Error,
}

/// Last-known server data for one key.
///
/// `Success` always carries a value and `Error` always carries an error.
/// Values are stored as JSON and decoded into the caller's type on read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  value: Option<Value>,
  fetched_at: Option<Instant>,
  stale_after: Duration,
  status: QueryStatus,
  error: Option<AppError>,
  invalidated: bool,
}

impl CacheEntry {
  /// Fresh data straight from the network.
  pub(crate) fn success(value: Value, stale_after: Duration) -> Self {
    Self {
      value: Some(value),
      fetched_at: Some(Instant::now()),
      stale_after,
      status: QueryStatus::Success,
      error: None,
      invalidated: false,
    }
  }

  /// Data restored from persistent storage. Usable, but always revalidated.
  pub(crate) fn hydrated(value: Value, stale_after: Duration) -> Self {
    Self {
      value: Some(value),
      fetched_at: None,
      stale_after,
      status: QueryStatus::Success,
      error: None,
      invalidated: true,
    }
  }

  /// Placeholder for a key whose first fetch has just started.
  pub(crate) fn loading(stale_after: Duration) -> Self {
    Self {
      value: None,
      fetched_at: None,
      stale_after,
      status: QueryStatus::Loading,
      error: None,
      invalidated: false,
    }
  }

  /// Entry for a key that failed before any value was ever fetched.
  pub(crate) fn failed(error: AppError, stale_after: Duration) -> Self {
    Self {
      value: None,
      fetched_at: None,
      stale_after,
      status: QueryStatus::Error,
      error: Some(error),
      invalidated: false,
    }
  }

  /// Provisional value written by a mutation.
  ///
  /// An existing entry keeps its status and timestamps; a missing one becomes a
  /// `Loading` entry that only holds the optimistic value.
  pub(crate) fn optimistic(prior: Option<&CacheEntry>, value: Value, stale_after: Duration) -> Self {
    match prior {
      Some(prior) => Self {
        value: Some(value),
        ..prior.clone()
      },
      None => Self {
        value: Some(value),
        ..Self::loading(stale_after)
      },
    }
  }

  /// Same entry, now fetching. The previous value stays visible.
  pub(crate) fn into_loading(self) -> Self {
    Self {
      status: QueryStatus::Loading,
      ..self
    }
  }

  /// Same entry, now failed. The previous value stays visible.
  pub(crate) fn into_error(self, error: AppError) -> Self {
    Self {
      status: QueryStatus::Error,
      error: Some(error),
      ..self
    }
  }

  /// Settle an optimistic-only entry once its mutation is confirmed.
  pub(crate) fn into_confirmed(self) -> Self {
    let status = if self.value.is_some() {
      QueryStatus::Success
    } else {
      self.status
    };
    Self { status, ..self }
  }

  /// Drop a `Loading` status whose fetch is gone. Holding a value it becomes
  /// `Success`; without one there is nothing to keep and `None` is returned.
  pub(crate) fn into_settled(self) -> Option<Self> {
    match (self.status, &self.value) {
      (QueryStatus::Loading, Some(_)) => Some(Self {
        status: QueryStatus::Success,
        error: None,
        ..self
      }),
      (QueryStatus::Loading, None) => None,
      _ => Some(self),
    }
  }

  pub(crate) fn with_value(self, value: Value) -> Self {
    Self {
      value: Some(value),
      ..self
    }
  }

  pub(crate) fn mark_invalidated(&mut self) {
    self.invalidated = true;
  }

  pub fn value(&self) -> Option<&Value> {
    self.value.as_ref()
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  pub fn error(&self) -> Option<&AppError> {
    self.error.as_ref()
  }

  /// When the value was last fetched; `None` if it never came from the network
  /// in this process.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  pub fn stale_after(&self) -> Duration {
    self.stale_after
  }

  pub fn is_invalidated(&self) -> bool {
    self.invalidated
  }

  /// Fresh means successfully fetched less than `stale_after` ago and not
  /// invalidated since.
  pub fn is_fresh_within(&self, stale_after: Duration, now: Instant) -> bool {
    if self.status != QueryStatus::Success || self.invalidated {
      return false;
    }
    self
      .fetched_at
      .map(|t| now.saturating_duration_since(t) < stale_after)
      .unwrap_or(false)
  }

  /// Freshness against the entry's own window.
  pub fn is_stale(&self, now: Instant) -> bool {
    !self.is_fresh_within(self.stale_after, now)
  }

  /// Decode the stored value into `T`.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, AppError> {
    self
      .value
      .as_ref()
      .map(|v| serde_json::from_value(v.clone()))
      .transpose()
      .map_err(AppError::from)
  }
}
