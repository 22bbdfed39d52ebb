//! Per-org completion rate limiter: fixed one-minute windows, sharded by
//! org id. Excess calls fail fast with `RateLimited`; the error is not
//! retryable at this layer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use rf_domain::{Error, Result};

const WINDOW: Duration = Duration::from_secs(60);

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    per_minute: u32,
    windows: Mutex<HashMap<Uuid, Window>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one request for the org or fail with `RateLimited`.
    pub fn check(&self, org_id: Uuid) -> Result<()> {
        self.check_at(org_id, Instant::now())
    }

    fn check_at(&self, org_id: Uuid, now: Instant) -> Result<()> {
        let mut windows = self.windows.lock();
        let window = windows.entry(org_id).or_insert(Window { started: now, count: 0 });

        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.per_minute {
            let elapsed = now.duration_since(window.started);
            let retry_after_secs = WINDOW.saturating_sub(elapsed).as_secs().max(1);
            return Err(Error::RateLimited { retry_after_secs });
        }

        window.count += 1;
        Ok(())
    }

    /// Drop windows idle for more than a minute. Called periodically.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, w| now.duration_since(w.started) < WINDOW * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit() {
        let limiter = RateLimiter::new(3);
        let org = Uuid::new_v4();
        let t0 = Instant::now();
        for _ in 0..3 {
            limiter.check_at(org, t0).unwrap();
        }
        let err = limiter.check_at(org, t0).unwrap_err();
        match err {
            Error::RateLimited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1);
        let org = Uuid::new_v4();
        let t0 = Instant::now();
        limiter.check_at(org, t0).unwrap();
        assert!(limiter.check_at(org, t0).is_err());
        limiter.check_at(org, t0 + Duration::from_secs(61)).unwrap();
    }

    #[test]
    fn orgs_are_independent() {
        let limiter = RateLimiter::new(1);
        let t0 = Instant::now();
        limiter.check_at(Uuid::new_v4(), t0).unwrap();
        limiter.check_at(Uuid::new_v4(), t0).unwrap();
    }

    #[test]
    fn rate_limited_is_not_retryable() {
        assert!(!Error::RateLimited { retry_after_secs: 10 }.is_retryable());
    }
}
