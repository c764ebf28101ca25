//! Optimistic mutations with exact rollback.
//!
//! A [`Mutation`] describes one kind of server write together with how it
//! changes cached data. [`crate::query::QueryClient::mutate`] drives it:
//!
//! 1. snapshot the affected keys and apply the optimistic values
//! 2. run [`Mutation::execute`]
//! 3. on success, write the reconciled values; on failure, restore the
//!    snapshot exactly and then call [`Mutation::on_error`]
//! 4. invalidate the affected keys either way
//!
//! Mutations overlapping on the same keys are not serialized against each
//! other: a rollback restores its own snapshot even if another mutation wrote
//! in between, until revalidation brings the server state back.

mod coordinator;
mod snapshot;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::CacheKey;
use crate::error::AppError;
use crate::query::Revalidate;

pub use snapshot::MutationSnapshot;

/// A server write and its effect on cached data.
///
/// `apply_optimistic` and `reconcile` run while the cache is locked; they must
/// be pure functions of their arguments and must not touch the client.
#[async_trait]
pub trait Mutation: Send + Sync + 'static {
  type Input: Send + Sync + 'static;
  type Output: Send + Sync + 'static;
  /// Shape of the cached values under the affected keys.
  type CacheValue: Serialize + DeserializeOwned;

  /// Keys whose values change optimistically.
  fn affected_keys(&self, input: &Self::Input) -> Vec<CacheKey>;

  /// Perform the request.
  async fn execute(&self, input: &Self::Input) -> Result<Self::Output, AppError>;

  /// Provisional value for `key`. `current` is `None` when nothing is cached.
  /// Returning `None` leaves the key untouched.
  fn apply_optimistic(
    &self,
    input: &Self::Input,
    key: &CacheKey,
    current: Option<Self::CacheValue>,
  ) -> Option<Self::CacheValue>;

  /// Authoritative value for `key` once the server confirmed the write.
  /// Returning `None` keeps the optimistic value.
  fn reconcile(
    &self,
    _input: &Self::Input,
    _output: &Self::Output,
    _key: &CacheKey,
    _current: Option<Self::CacheValue>,
  ) -> Option<Self::CacheValue> {
    None
  }

  /// Keys to drop entirely after success, e.g. detail entries of a deleted resource.
  fn removed_keys(&self, _input: &Self::Input, _output: &Self::Output) -> Vec<CacheKey> {
    Vec::new()
  }

  /// Called after the snapshot has been restored.
  fn on_error(&self, _input: &Self::Input, _error: &AppError) {}

  /// Override the client's revalidation mode for this mutation.
  fn revalidate(&self) -> Option<Revalidate> {
    None
  }
}
