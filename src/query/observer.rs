//! Poll-based handle over a single cached query.
//!
//! A `QueryObserver<T>` is what a screen or event loop holds on to: it starts
//! fetches through the shared [`QueryClient`], exposes the current
//! value/status/error, and can be polled from a tick handler without blocking.
//!
//! # Example
//!
//! ```ignore
//! let http = resource_client.clone();
//! let mut tickets = QueryObserver::new(client.clone(), Resource::Tickets.list_key(), move || {
//!     let http = http.clone();
//!     async move { http.get_list::<Ticket>("support/tickets").await }
//! });
//!
//! tickets.fetch();
//!
//! // In event loop tick
//! if tickets.poll() {
//!     // State changed, trigger re-render
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache::{CacheKey, QueryStatus};
use crate::error::AppError;

use super::client::{QueryClient, QueryOptions};

type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, AppError>> + Send + Sync>;

/// Observer of one query key.
///
/// Dropping the observer abandons interest; a request already in flight keeps
/// running and still fills the cache for the next reader.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: CacheKey,
  fetcher: FetcherFn<T>,
  options: QueryOptions,
  status: QueryStatus,
  value: Option<T>,
  error: Option<AppError>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, AppError>>>,
}

impl<T> QueryObserver<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
  /// Create an observer. Any value already cached for `key` is shown straight away.
  pub fn new<F, Fut>(client: QueryClient, key: CacheKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
  {
    let (status, value, error) = match client.peek::<T>(&key) {
      Ok(Some(view)) => (view.status, view.value, view.error),
      Ok(None) => (QueryStatus::Idle, None, None),
      Err(e) => (QueryStatus::Error, None, Some(e)),
    };

    Self {
      client,
      key,
      fetcher: Arc::new(move || fetcher().boxed()),
      options: QueryOptions::default(),
      status,
      value,
      error,
      receiver: None,
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn status(&self) -> QueryStatus {
    self.status
  }

  /// Last-known-good value; still set while loading or after an error.
  pub fn value(&self) -> Option<&T> {
    self.value.as_ref()
  }

  pub fn error(&self) -> Option<&AppError> {
    self.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  /// Start a cache-first read unless one is already pending.
  pub fn fetch(&mut self) {
    if self.receiver.is_some() {
      return;
    }
    self.start();
  }

  /// Mark the key stale and read it again, going to the network.
  pub fn refetch(&mut self) {
    self.client.store().invalidate_key(&self.key);
    self.receiver = None;
    self.start();
  }

  /// Poll for the result of a pending read.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(value)) => {
        self.status = QueryStatus::Success;
        self.value = Some(value);
        self.error = None;
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.status = QueryStatus::Error;
        self.error = Some(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.status = QueryStatus::Error;
        self.error = Some(AppError::internal("query was cancelled"));
        self.receiver = None;
        true
      }
    }
  }

  fn start(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.status = QueryStatus::Loading;

    let client = self.client.clone();
    let key = self.key.clone();
    let fetcher = self.fetcher.clone();
    let options = self.options.clone();
    tokio::spawn(async move {
      let result = client
        .query(&key, move || fetcher(), options)
        .await
        .map(|r| r.value);
      // Ignore send errors - the observer may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("value", &self.value)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}
