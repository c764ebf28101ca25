//! Retry policy for query fetches.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;

type RetryPredicate = Arc<dyn Fn(u32, &AppError) -> bool + Send + Sync>;

/// Decides whether a failed fetch is attempted again and how long to wait.
///
/// `attempt` is the number of attempts made so far (1 after the first failure).
/// Client (4xx) errors are never retried, whatever the predicate says.
#[derive(Clone)]
pub struct RetryPolicy {
  predicate: RetryPredicate,
  base_delay: Duration,
  max_delay: Duration,
}

impl RetryPolicy {
  /// Retry transient failures until `max_attempts` attempts have been made.
  pub fn new(max_attempts: u32) -> Self {
    Self::with_predicate(move |attempt, error| attempt < max_attempts && error.is_transient())
  }

  /// A single attempt.
  pub fn never() -> Self {
    Self::with_predicate(|_, _| false)
  }

  pub fn with_predicate<F>(predicate: F) -> Self
  where
    F: Fn(u32, &AppError) -> bool + Send + Sync + 'static,
  {
    Self {
      predicate: Arc::new(predicate),
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  /// Exponential backoff starting at `base` and capped at `max`.
  pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
    self.base_delay = base;
    self.max_delay = max;
    self
  }

  pub fn should_retry(&self, attempt: u32, error: &AppError) -> bool {
    if error.is_client_error() {
      return false;
    }
    (self.predicate)(attempt, error)
  }

  /// Delay before the attempt following `attempt`.
  pub fn delay(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    self
      .base_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_delay)
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3)
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("base_delay", &self.base_delay)
      .field("max_delay", &self.max_delay)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_retries_transient_up_to_three_attempts() {
    let policy = RetryPolicy::default();
    let server = AppError::from_status(502, "bad gateway", None);
    assert!(policy.should_retry(1, &server));
    assert!(policy.should_retry(2, &server));
    assert!(!policy.should_retry(3, &server));
    assert!(policy.should_retry(1, &AppError::transport("reset")));
  }

  #[test]
  fn test_client_errors_are_never_retried() {
    let always = RetryPolicy::with_predicate(|_, _| true);
    assert!(!always.should_retry(1, &AppError::from_status(404, "missing", None)));
    assert!(!RetryPolicy::new(10).should_retry(1, &AppError::from_status(422, "bad", None)));
  }

  #[test]
  fn test_never() {
    assert!(!RetryPolicy::never().should_retry(1, &AppError::transport("down")));
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay(1), Duration::from_secs(1));
    assert_eq!(policy.delay(2), Duration::from_secs(2));
    assert_eq!(policy.delay(3), Duration::from_secs(4));
    assert_eq!(policy.delay(12), Duration::from_secs(30));
  }
}
