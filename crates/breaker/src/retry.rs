//! Retry policy for activities: exponential backoff with jitter and a
//! capped attempt count. Non-retryable errors short-circuit immediately.

use std::time::Duration;

use rand::Rng;

use rf_domain::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Deterministic backoff component for attempt `n` (0-based), before
    /// jitter: `base * 2^n`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }

    /// Backoff with jitter applied, used for actual sleeps.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let jitter_ms = (base.as_millis() as f64 * self.jitter) as u64;
        if jitter_ms == 0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        base + Duration::from_millis(extra)
    }

    /// Run `op` until it succeeds, a non-retryable error occurs, or the
    /// attempt budget is exhausted. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    tracing::debug!(label, error = %err, "non-retryable, short-circuiting");
                    return Err(err);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        tracing::warn!(label, attempts = attempt, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    let delay = self.delay(attempt - 1);
                    tracing::debug!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
