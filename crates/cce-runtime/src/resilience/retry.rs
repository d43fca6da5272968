//! Retry with exponential backoff.
//!
//! A failed operation is re-invoked after `base_delay * 2^n` (n = 0, 1, ...)
//! until it succeeds or the attempt cap is reached. There is no jitter. The
//! most recent error is returned unmodified.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable, Sleeper};

/// Attempt cap and base delay for one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 is treated as 1.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles for each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn retries(&self) -> u32 {
        self.max_attempts.max(1) - 1
    }

    fn backoff(&self) -> ExponentialBuilder {
        let retries = self.retries();
        let longest = self
            .base_delay
            .saturating_mul(1u32 << retries.saturating_sub(1).min(31));

        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(longest)
            .with_factor(2.0)
            .with_max_times(retries as usize)
    }

    /// The sleeps a fully failing operation would go through, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.backoff().build().collect()
    }

    /// Run `operation` under this policy, sleeping on the tokio timer.
    pub async fn retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.retry_with_sleeper(operation, tokio::time::sleep).await
    }

    /// Run `operation` under this policy with a caller-supplied sleeper.
    pub async fn retry_with_sleeper<T, E, F, Fut, S>(&self, operation: F, sleeper: S) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        S: Sleeper,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        operation
            .retry(self.backoff())
            .sleep(sleeper)
            .notify(|err: &E, delay: Duration| {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying after backoff"
                );
            })
            .await
    }
}
