//! Infrastructure retries.
//!
//! Commit-log calls made by the driver are retried with exponential backoff.
//! This layer only covers transient faults in the substrate; a stage's own
//! `retries` budget is applied separately by the worker edge.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
  /// Retries after the first attempt.
  pub max_retries: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
  pub multiplier: f64,
  /// Fraction (0.0-1.0) of each delay that is spread around the base value.
  pub jitter: f64,
}

impl RetryPolicy {
  pub fn exponential(max_retries: u32, initial_backoff: Duration) -> Self {
    Self {
      max_retries,
      initial_backoff,
      max_backoff: Duration::from_secs(5),
      multiplier: 2.0,
      jitter: 0.1,
    }
  }

  /// Fail on the first error.
  pub fn none() -> Self {
    Self {
      max_retries: 0,
      initial_backoff: Duration::ZERO,
      max_backoff: Duration::ZERO,
      multiplier: 1.0,
      jitter: 0.0,
    }
  }

  /// Delay to wait before retry number `retry` (1-based). Zero for `0`.
  pub fn delay_for_retry(&self, retry: u32) -> Duration {
    if retry == 0 {
      return Duration::ZERO;
    }

    let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
    let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
    let clamped = base.min(self.max_backoff.as_secs_f64());

    // Deterministic spread, so concurrent edges do not retry in lockstep.
    let spread = ((f64::from(retry) * 0.618_033_988_749_895) % 1.0) * 2.0 - 1.0;
    let jittered = clamped + clamped * self.jitter.clamp(0.0, 1.0) * spread;

    Duration::from_secs_f64(jittered.max(0.0))
  }

  pub fn should_retry(&self, retries_so_far: u32) -> bool {
    retries_so_far < self.max_retries
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::exponential(3, Duration::from_millis(50))
  }
}

/// Run `op`, retrying failures according to `policy`.
///
/// Returns the last error once the policy gives up.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: Display,
{
  let mut retries = 0;

  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if !policy.should_retry(retries) => return Err(e),
      Err(e) => {
        retries += 1;
        let delay = policy.delay_for_retry(retries);
        warn!(
          operation = operation,
          retry = retries,
          delay_ms = delay.as_millis() as u64,
          error = %e,
          "store_operation_retry"
        );
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
}
