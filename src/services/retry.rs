//! Exponential-backoff retry for persistence writes, parameterized over
//! `PersistenceError`.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::domain::errors::PersistenceError;

/// Backoff doubles with each retry, capped at `max_backoff_ms`: with the
/// default 50ms/400ms settings that's 50 -> 100 -> 200 -> 400 (capped).
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 400,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Retry `operation` on a transient `PersistenceError` (pool timeout
    /// or transaction failure); a `NotFound`, `QueryFailed`, or
    /// `MigrationFailed` is treated as permanent and returned immediately.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, PersistenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PersistenceError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !is_transient(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let backoff = self.calculate_backoff(attempt);
                    warn!(attempt = attempt + 1, max_retries = self.max_retries, ?backoff, error = %err, "retrying persistence write");
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);
        Duration::from_millis(backoff_ms)
    }
}

fn is_transient(err: &PersistenceError) -> bool {
    matches!(err, PersistenceError::PoolTimeout { .. } | PersistenceError::TransactionFailed(_))
}
