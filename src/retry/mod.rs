//! Generic exponential-backoff executor
//!
//! Shared by the primary fetcher and the cross-validator. Delay between
//! attempts is `min(initial * 2^attempt, max)` with no jitter; errors the
//! operation classifies as non-transient abort immediately.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Classifies errors as transient (worth another attempt) or terminal.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(20);
        let ms = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(ms).min(self.max_delay)
    }

    /// Run `op` up to `max_attempts` times, sleeping between attempts.
    /// On exhaustion the last observed error is returned.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
