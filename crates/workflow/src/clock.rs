//! The workflow clock: all time the decision logic observes flows
//! through this trait so replay and tests stay deterministic.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

#[async_trait::async_trait]
pub trait WorkflowClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production.
pub struct SystemClock;

#[async_trait::async_trait]
impl WorkflowClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manual clock for tests: `sleep` advances time instantly and records
/// the total slept, so dwell behavior is observable without waiting.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    slept: Mutex<Duration>,
    advanced: Notify,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            slept: Mutex::new(Duration::ZERO),
            advanced: Notify::new(),
        }
    }

    pub fn total_slept(&self) -> Duration {
        *self.slept.lock()
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        self.advanced.notify_waiters();
    }
}

#[async_trait::async_trait]
impl WorkflowClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut now = self.now.lock();
            *now += chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::zero());
            *self.slept.lock() += duration;
        }
        // Yield once so concurrent tasks interleave like a real sleep.
        tokio::task::yield_now().await;
    }
}
