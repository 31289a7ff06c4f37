/// Retry-with-backoff combinator
///
/// Runs an async operation up to `1 + retries` times, sleeping
/// `base * 2^(attempt-1)` between attempts. Non-retryable errors stop early.

use crate::runtime::error::ExecError;
use std::{future::Future, time::Duration};

/// Attempt budget and base delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    /// Delay before the first retry; doubles every time
    pub backoff_ms: u64,
}

/// Result of a retried operation together with how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ExecError>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff_ms: u64) -> Self {
        Self { retries, backoff_ms }
    }

    /// Delay slept after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// budget is spent
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecError>>,
    {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Attempted { result: Ok(value), attempts: attempt },
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.delay_for(attempt);
                    tracing::warn!(
                        "🔁 {} attempt {}/{} failed: {} (retrying in {:?})",
                        label,
                        attempt,
                        max_attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Attempted { result: Err(e), attempts: attempt },
            }
        }
    }
}
