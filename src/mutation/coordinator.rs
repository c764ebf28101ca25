//! Drives a [`Mutation`] through optimistic apply, settle and invalidation.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheKey, QueryStatus};
use crate::error::AppError;
use crate::query::{QueryClient, Revalidate};

use super::snapshot::MutationSnapshot;
use super::Mutation;

impl QueryClient {
  /// Run `mutation` with optimistic cache updates.
  ///
  /// The optimistic values are written before this returns its first
  /// `Pending`. The rest runs on its own task: once started, a mutation always
  /// ends confirmed or rolled back, even if the caller stops waiting.
  pub async fn mutate<M: Mutation>(&self, mutation: M, input: M::Input) -> Result<M::Output, AppError> {
    self.ensure_live()?;
    let keys = mutation.affected_keys(&input);
    let snapshot = self.apply_optimistic(&mutation, &input, &keys)?;

    let client = self.clone();
    tokio::spawn(async move { client.settle(mutation, input, snapshot).await })
      .await
      .unwrap_or_else(|e| Err(AppError::internal(format!("mutation task failed: {}", e))))
  }

  /// Snapshot `keys` and write the optimistic values under one store lock.
  ///
  /// Every current value is decoded before anything is written, so a type
  /// mismatch fails the mutation with the cache untouched.
  fn apply_optimistic<M: Mutation>(
    &self,
    mutation: &M,
    input: &M::Input,
    keys: &[CacheKey],
  ) -> Result<MutationSnapshot, AppError> {
    let stale_after = self.config().stale_after;
    self.store().transact(|entries| -> Result<MutationSnapshot, AppError> {
      let snapshot = MutationSnapshot::capture(entries, keys);

      let mut writes = Vec::with_capacity(snapshot.len());
      for (key, prior) in snapshot.iter() {
        let current = match prior {
          Some(entry) => entry.decode::<M::CacheValue>()?,
          None => None,
        };
        if let Some(next) = mutation.apply_optimistic(input, key, current) {
          let value = serde_json::to_value(next)?;
          writes.push((key.clone(), CacheEntry::optimistic(prior, value, stale_after)));
        }
      }

      for (key, entry) in writes {
        entries.insert(key, entry);
      }
      Ok(snapshot)
    })
  }

  async fn settle<M: Mutation>(
    &self,
    mutation: M,
    input: M::Input,
    snapshot: MutationSnapshot,
  ) -> Result<M::Output, AppError> {
    let outcome = AssertUnwindSafe(mutation.execute(&input))
      .catch_unwind()
      .await
      .unwrap_or_else(|_| Err(AppError::internal("mutation panicked")));

    let keys: Vec<CacheKey> = snapshot.keys().cloned().collect();
    // A disposed client's store is left untouched; the outcome still returns.
    let live = !self.is_disposed();
    let result = match outcome {
      Ok(output) => {
        if live {
          self.reconcile(&mutation, &input, &output, snapshot);
          for key in mutation.removed_keys(&input, &output) {
            self.store().remove(&key);
          }
        }
        info!(keys = keys.len(), "mutation confirmed");
        Ok(output)
      }
      Err(error) => {
        if live {
          self.hold_fetches(|is_fetching| snapshot.restore(self.store(), is_fetching));
        }
        warn!(keys = keys.len(), error = %error, "mutation failed, rolled back");
        mutation.on_error(&input, &error);
        Err(error)
      }
    };

    let revalidate = mutation.revalidate().unwrap_or(self.config().revalidate);
    self.invalidate_after_mutation(&keys, revalidate);
    result
  }

  /// Write reconciled values and settle entries this mutation created.
  fn reconcile<M: Mutation>(
    &self,
    mutation: &M,
    input: &M::Input,
    output: &M::Output,
    snapshot: MutationSnapshot,
  ) {
    let stale_after = self.config().stale_after;
    self.store().transact(|entries| {
      for (key, created) in snapshot.discard() {
        let current = entries.remove(&key);
        let decoded = match current.as_ref().map(|e| e.decode::<M::CacheValue>()).transpose() {
          Ok(decoded) => decoded.flatten(),
          Err(e) => {
            warn!(key = %key, error = %e, "cached value changed type, skipping reconcile");
            if let Some(entry) = current {
              entries.insert(key, entry);
            }
            continue;
          }
        };

        let reconciled = mutation
          .reconcile(input, output, &key, decoded)
          .map(serde_json::to_value)
          .transpose();
        let next = match (current, reconciled) {
          (Some(entry), Ok(Some(value))) => Some(entry.with_value(value)),
          (None, Ok(Some(value))) => Some(CacheEntry::optimistic(None, value, stale_after)),
          (entry, Ok(None)) => entry,
          (entry, Err(e)) => {
            warn!(key = %key, error = %e, "reconciled value is not serializable");
            entry
          }
        };

        let next = next.map(|entry| if created { entry.into_confirmed() } else { entry });
        match next {
          Some(entry) if !(created && entry.status() == QueryStatus::Loading) => {
            entries.insert(key, entry);
          }
          _ => {}
        }
      }
    });
  }

  fn invalidate_after_mutation(&self, keys: &[CacheKey], revalidate: Revalidate) {
    if self.is_disposed() {
      return;
    }
    let mut touched: Vec<CacheKey> = keys
      .iter()
      .flat_map(|key| self.store().invalidate(key))
      .collect();
    touched.sort();
    touched.dedup();

    if revalidate == Revalidate::Immediate {
      self.revalidate_now(&touched);
    }
  }
}
