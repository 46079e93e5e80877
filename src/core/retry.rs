//! Bounded retry of serialization conflicts
//!
//! Only `SerializationConflict` is retried. Every other error, and the last
//! conflict once the attempt budget is spent, goes straight back to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::types::LedgerResult;

/// Retry budget and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,

    /// Delay before the second attempt, doubled for each attempt after that
    pub initial_backoff: Duration,

    /// Upper bound of a single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails terminally, or the attempts run out
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(operation, attempt, ?delay, error = %err, "retrying after conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
