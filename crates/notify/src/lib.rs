//! Webhook notifier: fans lifecycle events out to configured endpoints
//! with HMAC-SHA256 signing (`X-Signature: sha256=<hex>` plus
//! `X-Timestamp`), breaker-guarded posts, bounded retries, and an
//! in-memory delivery log.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;
use uuid::Uuid;

use rf_breaker::{no_soft_errors, BreakerKey, BreakerRegistry};
use rf_domain::config::NotifyConfig;
use rf_domain::event::Event;
use rf_domain::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produce the `X-Signature` header value for a payload.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of an `X-Signature` header.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let expected = sign(secret, body);
    expected.as_bytes().ct_eq(header.as_bytes()).unwrap_u8() == 1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delivery log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_DELIVERIES: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub url: String,
    pub attempts: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bounded ring of recent delivery attempts, for introspection.
#[derive(Default)]
pub struct DeliveryLog {
    inner: RwLock<VecDeque<Delivery>>,
}

impl DeliveryLog {
    fn record(&self, delivery: Delivery) {
        let mut inner = self.inner.write();
        inner.push_back(delivery);
        while inner.len() > MAX_DELIVERIES {
            inner.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<Delivery> {
        self.inner
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Notifier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Endpoint {
    url: String,
    /// Signing secret resolved from the environment at startup.
    secret: Option<String>,
    /// Empty = deliver every event type.
    event_types: Vec<String>,
}

impl Endpoint {
    fn wants(&self, event_type: &str) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type)
    }
}

pub struct Notifier {
    client: reqwest::Client,
    endpoints: Vec<Endpoint>,
    breakers: Arc<BreakerRegistry>,
    max_attempts: u32,
    log: DeliveryLog,
}

impl Notifier {
    pub fn from_config(config: &NotifyConfig, breakers: Arc<BreakerRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        let endpoints = config
            .endpoints
            .iter()
            .map(|ep| {
                let secret = std::env::var(&ep.secret_env).ok();
                if secret.is_none() {
                    tracing::warn!(
                        url = %ep.url,
                        env_var = %ep.secret_env,
                        "webhook endpoint has no signing secret, deliveries will be unsigned"
                    );
                }
                Endpoint {
                    url: ep.url.clone(),
                    secret,
                    event_types: ep.event_types.clone(),
                }
            })
            .collect();

        Ok(Self {
            client,
            endpoints,
            breakers,
            max_attempts: config.max_attempts.max(1),
            log: DeliveryLog::default(),
        })
    }

    pub fn deliveries(&self) -> &DeliveryLog {
        &self.log
    }

    /// Deliver one event to every matching endpoint.
    pub async fn publish(&self, event: &Event) {
        let event_type = match serde_json::to_value(event.event_type) {
            Ok(serde_json::Value::String(s)) => s,
            _ => return,
        };
        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event for delivery");
                return;
            }
        };

        for endpoint in &self.endpoints {
            if !endpoint.wants(&event_type) {
                continue;
            }
            let (attempts, result) = self.deliver(endpoint, event, &body).await;
            self.log.record(Delivery {
                id: Uuid::new_v4(),
                event_id: event.id,
                event_type: event_type.clone(),
                url: endpoint.url.clone(),
                attempts,
                success: result.is_ok(),
                last_error: result.err().map(|e| e.to_string()),
                created_at: Utc::now(),
            });
        }
    }

    async fn deliver(&self, endpoint: &Endpoint, event: &Event, body: &[u8]) -> (u32, Result<()>) {
        let key = BreakerKey::new("webhook", &endpoint.url, event.org_id);
        let mut last: Result<()> = Ok(());
        for attempt in 1..=self.max_attempts {
            let result = self
                .breakers
                .call(&key, no_soft_errors, || self.post(endpoint, body))
                .await;
            match result {
                Ok(()) => return (attempt, Ok(())),
                Err(e) => {
                    tracing::warn!(
                        url = %endpoint.url,
                        attempt,
                        error = %e,
                        "webhook delivery attempt failed"
                    );
                    last = Err(e);
                }
            }
        }
        (self.max_attempts, last)
    }

    async fn post(&self, endpoint: &Endpoint, body: &[u8]) -> Result<()> {
        let timestamp = Utc::now().timestamp().to_string();
        let mut request = self
            .client
            .post(&endpoint.url)
            .header("content-type", "application/json")
            .header("x-timestamp", &timestamp)
            .body(body.to_vec());
        if let Some(secret) = &endpoint.secret {
            request = request.header("x-signature", sign(secret, body));
        }
        let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("webhook returned {status}")));
        }
        Ok(())
    }
}

/// Forward engine events into the notifier until the channel closes.
pub fn spawn_forwarder(notifier: Arc<Notifier>, mut rx: broadcast::Receiver<Event>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => notifier.publish(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(missed = n, "notifier lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
