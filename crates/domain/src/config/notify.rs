use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook notifications
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpoint>,
    /// Delivery attempts per endpoint before giving up.
    #[serde(default = "d_attempts")]
    pub max_attempts: u32,
    /// Per-delivery HTTP timeout, seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_attempts: d_attempts(),
            timeout_secs: d_timeout(),
        }
    }
}

fn d_attempts() -> u32 {
    3
}

fn d_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub url: String,
    /// Environment variable holding the HMAC signing secret.
    #[serde(default = "d_secret_env")]
    pub secret_env: String,
    /// Event types delivered to this endpoint; empty = all.
    #[serde(default)]
    pub event_types: Vec<String>,
}

fn d_secret_env() -> String {
    "RF_WEBHOOK_SECRET".into()
}
