//! Circuit breakers for every external call the engine makes.
//!
//! One breaker is kept per `(provider, endpoint, org)` tuple. A breaker
//! trips open after consecutive failures, fails calls fast while open,
//! admits a probe after a timeout, and closes again after consecutive
//! probe successes. Some provider errors are "soft" and do not count as
//! failures; callers classify via [`CallOutcome`].

pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use rf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Breaker state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// How a guarded call ended, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Provider-side condition that should not count against the breaker
    /// (e.g. a well-formed 4xx the caller caused).
    Soft,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// A single endpoint's breaker. Cheap to clone via `Arc` from the
/// registry; all state sits behind one mutex.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Admit or reject a call. While open, fails fast with
    /// [`Error::BreakerOpen`] carrying the next retry time.
    pub fn admit(&self, endpoint: &str) -> Result<()> {
        self.admit_at(endpoint, Utc::now())
    }

    /// Clock-injected variant for tests.
    pub fn admit_at(&self, endpoint: &str, now: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let opened = inner.opened_at.unwrap_or(now);
                let retry_at = opened
                    + chrono::Duration::from_std(self.config.open_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(30));
                if now >= retry_at {
                    // Timeout elapsed: admit one probe in half-open.
                    inner.state = BreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    tracing::debug!(endpoint, "breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(Error::BreakerOpen {
                        endpoint: endpoint.to_string(),
                        retry_at,
                    })
                }
            }
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record(&self, endpoint: &str, outcome: CallOutcome) {
        self.record_at(endpoint, outcome, Utc::now());
    }

    pub fn record_at(&self, endpoint: &str, outcome: CallOutcome, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        match outcome {
            CallOutcome::Soft => {}
            CallOutcome::Success => {
                inner.consecutive_failures = 0;
                if inner.state == BreakerState::HalfOpen {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.state = BreakerState::Closed;
                        inner.opened_at = None;
                        inner.consecutive_successes = 0;
                        tracing::info!(endpoint, "breaker closed");
                    }
                }
            }
            CallOutcome::Failure => {
                inner.consecutive_successes = 0;
                match inner.state {
                    BreakerState::HalfOpen => {
                        // Any half-open failure re-opens immediately.
                        inner.state = BreakerState::Open;
                        inner.opened_at = Some(now);
                        tracing::warn!(endpoint, "breaker re-opened from half-open");
                    }
                    BreakerState::Closed => {
                        inner.consecutive_failures += 1;
                        if inner.consecutive_failures >= self.config.failure_threshold {
                            inner.state = BreakerState::Open;
                            inner.opened_at = Some(now);
                            tracing::warn!(
                                endpoint,
                                failures = inner.consecutive_failures,
                                "breaker opened"
                            );
                        }
                    }
                    BreakerState::Open => {}
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BreakerKey {
    pub provider: String,
    pub endpoint: String,
    pub org_id: Uuid,
}

impl BreakerKey {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>, org_id: Uuid) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
            org_id,
        }
    }

    /// Log-friendly form: `provider/endpoint`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.endpoint)
    }
}

/// Read-only snapshot of one breaker, for introspection endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub key: BreakerKey,
    pub state: BreakerState,
}

/// Process-wide breaker registry. Breakers are created on first use and
/// shared thereafter.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<BreakerKey, Arc<CircuitBreaker>>>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub fn get(&self, key: &BreakerKey) -> Arc<CircuitBreaker> {
        // Fast path: read lock.
        {
            let breakers = self.breakers.read();
            if let Some(b) = breakers.get(key) {
                return b.clone();
            }
        }
        // Slow path: write lock to insert.
        let mut breakers = self.breakers.write();
        breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.default_config)))
            .clone()
    }

    /// Guard an async call: admit, run, record. `is_soft` classifies
    /// errors that should not count against the breaker.
    pub async fn call<T, F, Fut>(
        &self,
        key: &BreakerKey,
        is_soft: fn(&Error) -> bool,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let breaker = self.get(key);
        let label = key.label();
        breaker.admit(&label)?;
        match f().await {
            Ok(value) => {
                breaker.record(&label, CallOutcome::Success);
                Ok(value)
            }
            Err(err) => {
                let outcome = if is_soft(&err) {
                    CallOutcome::Soft
                } else {
                    CallOutcome::Failure
                };
                breaker.record(&label, outcome);
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read();
        let mut snap: Vec<BreakerSnapshot> = breakers
            .iter()
            .map(|(key, b)| BreakerSnapshot {
                key: key.clone(),
                state: b.state(),
            })
            .collect();
        snap.sort_by(|a, b| a.key.label().cmp(&b.key.label()));
        snap
    }
}

/// Default soft-error classifier: nothing is soft.
pub fn no_soft_errors(_err: &Error) -> bool {
    false
}

/// Classifier for provider calls: client-side conditions (schema, policy,
/// authz, rate limits) are not endpoint health signals.
pub fn client_errors_are_soft(err: &Error) -> bool {
    matches!(
        err,
        Error::SchemaInvalid(_)
            | Error::PolicyDenied(_)
            | Error::Unauthorized(_)
            | Error::RateLimited { .. }
            | Error::QuotaExceeded { .. }
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let b = CircuitBreaker::new(config());
        for _ in 0..4 {
            b.record("ep", CallOutcome::Failure);
            assert_eq!(b.state(), BreakerState::Closed);
        }
        b.record("ep", CallOutcome::Failure);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn success_resets_failure_streak() {
        let b = CircuitBreaker::new(config());
        for _ in 0..4 {
            b.record("ep", CallOutcome::Failure);
        }
        b.record("ep", CallOutcome::Success);
        for _ in 0..4 {
            b.record("ep", CallOutcome::Failure);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn soft_outcomes_do_not_count() {
        let b = CircuitBreaker::new(config());
        for _ in 0..20 {
            b.record("ep", CallOutcome::Soft);
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn open_fails_fast_with_retry_at() {
        let b = CircuitBreaker::new(config());
        let t0 = Utc::now();
        for _ in 0..5 {
            b.record_at("ep", CallOutcome::Failure, t0);
        }
        let err = b.admit_at("ep", t0 + chrono::Duration::seconds(1)).unwrap_err();
        match err {
            Error::BreakerOpen { endpoint, retry_at } => {
                assert_eq!(endpoint, "ep");
                assert_eq!(retry_at, t0 + chrono::Duration::seconds(30));
            }
            other => panic!("expected BreakerOpen, got {other:?}"),
        }
    }

    #[test]
    fn half_open_probe_then_close() {
        let b = CircuitBreaker::new(config());
        let t0 = Utc::now();
        for _ in 0..5 {
            b.record_at("ep", CallOutcome::Failure, t0);
        }
        // After the timeout a probe is admitted.
        let probe_time = t0 + chrono::Duration::seconds(31);
        b.admit_at("ep", probe_time).unwrap();
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Two consecutive successes close it.
        b.record_at("ep", CallOutcome::Success, probe_time);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_at("ep", CallOutcome::Success, probe_time);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = CircuitBreaker::new(config());
        let t0 = Utc::now();
        for _ in 0..5 {
            b.record_at("ep", CallOutcome::Failure, t0);
        }
        let probe_time = t0 + chrono::Duration::seconds(31);
        b.admit_at("ep", probe_time).unwrap();
        b.record_at("ep", CallOutcome::Failure, probe_time);
        assert_eq!(b.state(), BreakerState::Open);

        // And the open window restarts from the probe failure.
        let err = b
            .admit_at("ep", probe_time + chrono::Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, Error::BreakerOpen { .. }));
    }

    #[test]
    fn registry_shares_breakers_per_key() {
        let registry = BreakerRegistry::new(config());
        let org = Uuid::new_v4();
        let key = BreakerKey::new("aws", "ec2.DescribeInstances", org);
        let a = registry.get(&key);
        let b = registry.get(&key);
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get(&BreakerKey::new("aws", "ec2.StopInstances", org));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn call_records_success_and_failure() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 2,
            ..config()
        });
        let key = BreakerKey::new("llm", "complete", Uuid::new_v4());

        let ok: Result<u32> = registry.call(&key, no_soft_errors, || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..2 {
            let _: Result<u32> = registry
                .call(&key, no_soft_errors, || async {
                    Err(Error::Http("503".into()))
                })
                .await;
        }
        assert_eq!(registry.get(&key).state(), BreakerState::Open);

        // Now the breaker rejects before the closure runs.
        let err = registry
            .call(&key, no_soft_errors, || async { Ok(1u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BreakerOpen { .. }));
    }

    #[tokio::test]
    async fn soft_classifier_keeps_breaker_closed() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..config()
        });
        let key = BreakerKey::new("policy", "evaluate", Uuid::new_v4());
        for _ in 0..3 {
            let _: Result<()> = registry
                .call(&key, client_errors_are_soft, || async {
                    Err(Error::PolicyDenied("nope".into()))
                })
                .await;
        }
        assert_eq!(registry.get(&key).state(), BreakerState::Closed);
    }

    #[test]
    fn snapshot_lists_keys_sorted() {
        let registry = BreakerRegistry::new(config());
        let org = Uuid::new_v4();
        registry.get(&BreakerKey::new("b", "z", org));
        registry.get(&BreakerKey::new("a", "y", org));
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].key.provider, "a");
        assert!(snap.iter().all(|s| s.state == BreakerState::Closed));
    }
}
