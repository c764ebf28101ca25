//! Query executor: cache-first reads with in-flight de-duplication.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, CacheStorage, CacheStore, NoopStorage};
use crate::error::AppError;

use super::result::{CacheSource, QueryResult, QueryView};
use super::retry::RetryPolicy;

/// What happens to invalidated queries after a mutation settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Revalidate {
  /// Refetch every invalidated key that has a known fetcher right away
  Immediate,
  /// Only mark entries stale; the next read refetches
  #[default]
  Lazy,
}

/// Client-wide defaults.
#[derive(Debug, Clone)]
pub struct QueryClientConfig {
  pub stale_after: Duration,
  pub retry: RetryPolicy,
  pub revalidate: Revalidate,
}

impl Default for QueryClientConfig {
  fn default() -> Self {
    Self {
      stale_after: Duration::from_secs(300),
      retry: RetryPolicy::default(),
      revalidate: Revalidate::default(),
    }
  }
}

/// Per-query overrides of the client defaults.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
  stale_after: Option<Duration>,
  retry: Option<RetryPolicy>,
}

impl QueryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stale_after(mut self, stale_after: Duration) -> Self {
    self.stale_after = Some(stale_after);
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }
}

#[derive(Debug, Clone)]
struct ResolvedOptions {
  stale_after: Duration,
  retry: RetryPolicy,
}

type FetchFuture = BoxFuture<'static, Result<Value, AppError>>;
type ErasedFetcher = Arc<dyn Fn() -> FetchFuture + Send + Sync>;
type SharedFetch = Shared<FetchFuture>;

/// Last fetcher seen for a key, kept so the key can be refetched later.
struct Registration {
  fetcher: ErasedFetcher,
  options: ResolvedOptions,
}

struct InFlight {
  id: u64,
  fetch: SharedFetch,
}

struct Inner {
  store: CacheStore,
  in_flight: Mutex<HashMap<CacheKey, InFlight>>,
  registry: Mutex<HashMap<CacheKey, Registration>>,
  config: QueryClientConfig,
  next_fetch_id: AtomicU64,
  disposed: AtomicBool,
}

/// Explicitly constructed cache context shared by queries and mutations.
///
/// Cloning is cheap; all clones share one store. Create one at startup and
/// call [`QueryClient::dispose`] at shutdown or test teardown.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  pub fn new(config: QueryClientConfig) -> Self {
    Self::with_storage(config, Arc::new(NoopStorage))
  }

  /// Create a client whose confirmed results are written through to `storage`.
  /// Previously stored results are loaded as stale entries.
  pub fn with_storage(config: QueryClientConfig, storage: Arc<dyn CacheStorage>) -> Self {
    let store = CacheStore::with_storage(storage);
    let hydrated = store.hydrate(config.stale_after);
    if hydrated > 0 {
      info!(entries = hydrated, "restored cached query results");
    }

    Self {
      inner: Arc::new(Inner {
        store,
        in_flight: Mutex::new(HashMap::new()),
        registry: Mutex::new(HashMap::new()),
        config,
        next_fetch_id: AtomicU64::new(1),
        disposed: AtomicBool::new(false),
      }),
    }
  }

  pub fn config(&self) -> &QueryClientConfig {
    &self.inner.config
  }

  /// Read access to the underlying store.
  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::Acquire)
  }

  /// Tear the client down. Pending fetches still finish but no longer write to
  /// the cache, and further queries fail.
  pub fn dispose(&self) {
    self.inner.disposed.store(true, Ordering::Release);
    lock(&self.inner.in_flight).clear();
    lock(&self.inner.registry).clear();
    self.inner.store.clear_memory();
    info!("query client disposed");
  }

  /// Drop every cached entry, including persisted ones.
  pub fn clear(&self) {
    self.inner.store.clear();
  }

  pub(crate) fn ensure_live(&self) -> Result<(), AppError> {
    if self.is_disposed() {
      return Err(AppError::internal("query client has been disposed"));
    }
    Ok(())
  }

  /// Cache-first read of `key`.
  ///
  /// A fresh entry is returned without I/O. Otherwise `fetch` runs, unless a
  /// request for the same key is already in flight, in which case this call
  /// waits for that one. Failures are stored on the entry (keeping the last
  /// good value) and returned.
  pub async fn query<T, F, Fut>(
    &self,
    key: &CacheKey,
    fetch: F,
    options: QueryOptions,
  ) -> Result<QueryResult<T>, AppError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
  {
    self.ensure_live()?;
    let options = self.resolve(options);

    if let Some(entry) = self.inner.store.get(key) {
      if entry.is_fresh_within(options.stale_after, Instant::now()) {
        if let Some(value) = entry.decode::<T>()? {
          debug!(key = %key, "cache hit");
          return Ok(QueryResult {
            value,
            source: CacheSource::CacheFresh,
            fetched_at: entry.fetched_at(),
          });
        }
      }
    }

    let fetcher = erase(fetch);
    self.register(key, fetcher.clone(), options.clone());
    let (fetch, source) = self.start_or_join(key, fetcher, options);
    let value = fetch.await?;

    Ok(QueryResult {
      value: serde_json::from_value(value)?,
      source,
      fetched_at: self.inner.store.get(key).and_then(|e| e.fetched_at()),
    })
  }

  /// Fetch `key` again with its last known fetcher, ignoring freshness.
  ///
  /// Returns `Ok(None)` when the key was never queried through this client.
  pub async fn refetch<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, AppError> {
    self.ensure_live()?;
    let registered = lock(&self.inner.registry)
      .get(key)
      .map(|r| (r.fetcher.clone(), r.options.clone()));
    let Some((fetcher, options)) = registered else {
      return Ok(None);
    };

    let (fetch, _) = self.start_or_join(key, fetcher, options);
    let value = fetch.await?;
    Ok(Some(serde_json::from_value(value)?))
  }

  /// Mark everything under `prefix` stale, refetching right away when
  /// `revalidate` is [`Revalidate::Immediate`].
  pub fn invalidate(&self, prefix: &CacheKey, revalidate: Revalidate) -> Vec<CacheKey> {
    let keys = self.inner.store.invalidate(prefix);
    if revalidate == Revalidate::Immediate {
      self.revalidate_now(&keys);
    }
    keys
  }

  /// Start background refetches for the given keys. Keys without a known
  /// fetcher are skipped. Returns the number of fetches started or joined.
  pub(crate) fn revalidate_now(&self, keys: &[CacheKey]) -> usize {
    if self.is_disposed() {
      return 0;
    }
    let mut started = 0;
    for key in keys {
      let registered = lock(&self.inner.registry)
        .get(key)
        .map(|r| (r.fetcher.clone(), r.options.clone()));
      if let Some((fetcher, options)) = registered {
        // The fetch runs on its own task; dropping the handle does not cancel it.
        let _ = self.start_or_join(key, fetcher, options);
        started += 1;
      }
    }
    debug!(requested = keys.len(), started, "revalidating queries");
    started
  }

  /// Current cache state for `key`, decoded into `T`.
  pub fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<QueryView<T>>, AppError> {
    self
      .inner
      .store
      .get(key)
      .map(|entry| QueryView::from_entry(&entry))
      .transpose()
  }

  pub fn is_fetching(&self, key: &CacheKey) -> bool {
    lock(&self.inner.in_flight).contains_key(key)
  }

  fn resolve(&self, options: QueryOptions) -> ResolvedOptions {
    ResolvedOptions {
      stale_after: options.stale_after.unwrap_or(self.inner.config.stale_after),
      retry: options
        .retry
        .unwrap_or_else(|| self.inner.config.retry.clone()),
    }
  }

  fn register(&self, key: &CacheKey, fetcher: ErasedFetcher, options: ResolvedOptions) {
    lock(&self.inner.registry).insert(key.clone(), Registration { fetcher, options });
  }

  /// Join the in-flight request for `key` or start a new one.
  ///
  /// The check and the insert happen under one lock, so concurrent callers
  /// for the same key produce exactly one request.
  fn start_or_join(
    &self,
    key: &CacheKey,
    fetcher: ErasedFetcher,
    options: ResolvedOptions,
  ) -> (SharedFetch, CacheSource) {
    let mut in_flight = lock(&self.inner.in_flight);
    if let Some(existing) = in_flight.get(key) {
      debug!(key = %key, "joining in-flight request");
      return (existing.fetch.clone(), CacheSource::Shared);
    }

    let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let stale_after = options.stale_after;
    self.inner.store.update(key, |prior| {
      Some(match prior {
        Some(prior) => prior.into_loading(),
        None => CacheEntry::loading(stale_after),
      })
    });

    debug!(key = %key, fetch_id = id, "starting fetch");
    let handle = tokio::spawn(run_fetch(self.clone(), key.clone(), id, fetcher, options));
    let fetch = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(AppError::internal(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    in_flight.insert(
      key.clone(),
      InFlight {
        id,
        fetch: fetch.clone(),
      },
    );
    (fetch, CacheSource::Network)
  }

  /// Run `f` while no fetch can start or finish. `f` receives a predicate
  /// telling whether a key has a fetch in flight.
  pub(crate) fn hold_fetches<R>(&self, f: impl FnOnce(&dyn Fn(&CacheKey) -> bool) -> R) -> R {
    let in_flight = lock(&self.inner.in_flight);
    f(&|key| in_flight.contains_key(key))
  }

  /// Settle the entry and retire the in-flight slot under the in-flight lock.
  fn finish_fetch(&self, key: &CacheKey, id: u64, result: &Result<Value, AppError>, stale_after: Duration) {
    let disposed = self.is_disposed();
    {
      let mut in_flight = lock(&self.inner.in_flight);
      if !disposed {
        match result {
          Ok(value) => {
            self
              .inner
              .store
              .set(key.clone(), CacheEntry::success(value.clone(), stale_after));
            debug!(key = %key, fetch_id = id, "fetch succeeded");
          }
          Err(error) => {
            self.inner.store.update(key, |prior| {
              Some(match prior {
                Some(prior) => prior.into_error(error.clone()),
                None => CacheEntry::failed(error.clone(), stale_after),
              })
            });
            warn!(key = %key, fetch_id = id, error = %error, "fetch failed");
          }
        }
      }
      if in_flight.get(key).is_some_and(|f| f.id == id) {
        in_flight.remove(key);
      }
    }

    match result {
      Ok(value) if !disposed => self.inner.store.persist(key, value),
      _ => {}
    }
  }
}

async fn run_fetch(
  client: QueryClient,
  key: CacheKey,
  id: u64,
  fetcher: ErasedFetcher,
  options: ResolvedOptions,
) -> Result<Value, AppError> {
  let mut attempt = 0u32;
  let result = loop {
    attempt += 1;
    let outcome = AssertUnwindSafe(async { fetcher().await })
      .catch_unwind()
      .await
      .unwrap_or_else(|_| Err(AppError::internal("fetch function panicked")));

    match outcome {
      Ok(value) => break Ok(value),
      Err(error) if options.retry.should_retry(attempt, &error) => {
        let delay = options.retry.delay(attempt);
        warn!(
          key = %key,
          attempt,
          delay_ms = delay.as_millis() as u64,
          error = %error,
          "fetch failed, retrying"
        );
        tokio::time::sleep(delay).await;
      }
      Err(error) => break Err(error),
    }
  };

  client.finish_fetch(&key, id, &result, options.stale_after);
  result
}

fn erase<T, F, Fut>(fetch: F) -> ErasedFetcher
where
  T: Serialize + Send + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, AppError>> + Send + 'static,
{
  Arc::new(move || {
    let pending = fetch();
    async move {
      let value = pending.await?;
      serde_json::to_value(value)
        .map_err(|e| AppError::decode(format!("fetched value is not serializable: {}", e)))
    }
    .boxed()
  })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{QueryStatus, SqliteStorage};
  use crate::error::ErrorKind;
  use serde_json::json;
  use std::sync::atomic::AtomicU32;

  fn client() -> QueryClient {
    QueryClient::new(QueryClientConfig::default())
  }

  fn counting<T: Clone + Send + Sync + 'static>(
    counter: &Arc<AtomicU32>,
    delay: Duration,
    result: Result<T, AppError>,
  ) -> impl Fn() -> BoxFuture<'static, Result<T, AppError>> + Send + Sync + 'static {
    let counter = counter.clone();
    move || {
      let counter = counter.clone();
      let result = result.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        result
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_concurrent_queries_share_one_fetch() {
    let client = client();
    let key = CacheKey::new("users").with(&json!({"page": 1})).unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    let calls = (0..5).map(|_| {
      client.query(
        &key,
        counting(&counter, Duration::from_millis(20), Ok(vec![1, 2, 3])),
        QueryOptions::new(),
      )
    });
    let results = futures::future::join_all(calls).await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let results: Vec<QueryResult<Vec<i32>>> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(results.iter().all(|r| r.value == vec![1, 2, 3]));
    assert_eq!(
      results
        .iter()
        .filter(|r| r.source == CacheSource::Network)
        .count(),
      1
    );
    assert!(!client.is_fetching(&key));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_threshold() {
    let client = client();
    let key = CacheKey::new("tickets").segment("list");
    let counter = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().stale_after(Duration::from_millis(500));

    let fetch = || counting(&counter, Duration::ZERO, Ok(json!(["t1"])));

    client.query::<Value, _, _>(&key, fetch(), options.clone()).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(499)).await;
    let hit = client.query::<Value, _, _>(&key, fetch(), options.clone()).await.unwrap();
    assert_eq!(hit.source, CacheSource::CacheFresh);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    client.query::<Value, _, _>(&key, fetch(), options).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_errors_are_not_retried() {
    let client = client();
    let key = CacheKey::new("users").id(404);
    let counter = Arc::new(AtomicU32::new(0));

    let err = client
      .query::<Value, _, _>(
        &key,
        counting(&counter, Duration::ZERO, Err(AppError::from_status(404, "not found", None))),
        QueryOptions::new().retry(RetryPolicy::new(10)),
      )
      .await
      .unwrap_err();

    assert_eq!(err.http_status(), 404);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let entry = client.store().get(&key).unwrap();
    assert_eq!(entry.status(), QueryStatus::Error);
    assert_eq!(entry.error(), Some(&err));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_errors_retry_up_to_three_attempts() {
    let client = client();
    let key = CacheKey::new("scheduler").segment("tasks");
    let counter = Arc::new(AtomicU32::new(0));

    let err = client
      .query::<Value, _, _>(
        &key,
        counting(&counter, Duration::ZERO, Err(AppError::from_status(503, "unavailable", None))),
        QueryOptions::new(),
      )
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_failure_recovers() {
    let client = client();
    let key = CacheKey::new("alliances").segment("list");
    let counter = Arc::new(AtomicU32::new(0));
    let seen = counter.clone();

    let result = client
      .query(
        &key,
        move || {
          let seen = seen.clone();
          async move {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
              Err(AppError::transport("connection reset"))
            } else {
              Ok(vec!["Goonswarm".to_string()])
            }
          }
        },
        QueryOptions::new(),
      )
      .await
      .unwrap();

    assert_eq!(result.value, vec!["Goonswarm".to_string()]);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_keeps_last_good_value() {
    let client = client();
    let key = CacheKey::new("chat").segment("contacts");
    let counter = Arc::new(AtomicU32::new(0));

    client
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!(["alice"]))), QueryOptions::new())
      .await
      .unwrap();
    client.invalidate(&key, Revalidate::Lazy);

    let err = client
      .query::<Value, _, _>(
        &key,
        counting(&counter, Duration::ZERO, Err(AppError::from_status(400, "bad", None))),
        QueryOptions::new(),
      )
      .await
      .unwrap_err();

    let view = client.peek::<Value>(&key).unwrap().unwrap();
    assert_eq!(view.status, QueryStatus::Error);
    assert_eq!(view.value, Some(json!(["alice"])));
    assert_eq!(view.error, Some(err));
  }

  #[tokio::test]
  async fn test_abandoned_query_still_populates_cache() {
    let client = client();
    let key = CacheKey::new("groups").segment("list");
    let counter = Arc::new(AtomicU32::new(0));

    let abandoned = tokio::time::timeout(
      Duration::from_millis(5),
      client.query(
        &key,
        counting(&counter, Duration::from_millis(50), Ok(json!([{"id": 1}]))),
        QueryOptions::new(),
      ),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let entry = client.store().get(&key).unwrap();
    assert_eq!(entry.status(), QueryStatus::Success);
    assert_eq!(entry.value(), Some(&json!([{"id": 1}])));
  }

  #[tokio::test]
  async fn test_refetch_uses_registered_fetcher() {
    let client = client();
    let key = CacheKey::new("permissions").segment("list");
    let counter = Arc::new(AtomicU32::new(0));

    assert_eq!(client.refetch::<Value>(&key).await.unwrap(), None);

    client
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!([]))), QueryOptions::new())
      .await
      .unwrap();
    let value = client.refetch::<Value>(&key).await.unwrap();
    assert_eq!(value, Some(json!([])));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_immediate_invalidation_refetches() {
    let client = client();
    let key = CacheKey::new("kanban").segment("tasks");
    let counter = Arc::new(AtomicU32::new(0));

    client
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!([]))), QueryOptions::new())
      .await
      .unwrap();

    let touched = client.invalidate(&CacheKey::new("kanban"), Revalidate::Immediate);
    assert_eq!(touched, vec![key.clone()]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(!client.store().get(&key).unwrap().is_invalidated());
  }

  #[tokio::test]
  async fn test_dispose() {
    let client = client();
    let key = CacheKey::new("users").segment("list");
    let counter = Arc::new(AtomicU32::new(0));

    client
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!([]))), QueryOptions::new())
      .await
      .unwrap();
    client.dispose();

    assert!(client.store().is_empty());
    let err = client
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!([]))), QueryOptions::new())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
  }

  #[tokio::test]
  async fn test_hydrated_entries_are_shown_then_revalidated() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn CacheStorage> =
      Arc::new(SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap());
    let key = CacheKey::new("corporations").segment("list");
    let counter = Arc::new(AtomicU32::new(0));

    let first = QueryClient::with_storage(QueryClientConfig::default(), storage.clone());
    first
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!(["old"]))), QueryOptions::new())
      .await
      .unwrap();

    let second = QueryClient::with_storage(QueryClientConfig::default(), storage);
    let view = second.peek::<Value>(&key).unwrap().unwrap();
    assert_eq!(view.value, Some(json!(["old"])));
    assert!(view.is_stale);

    let fresh = second
      .query(&key, counting(&counter, Duration::ZERO, Ok(json!(["new"]))), QueryOptions::new())
      .await
      .unwrap();
    assert_eq!(fresh.value, json!(["new"]));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }
}
