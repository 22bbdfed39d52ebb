use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Platform connector service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The connector service exposes the uniform tool capability set
/// (inventory, drift, patching, failover, ...) over one HTTP interface.
/// With no URL configured, tool invocations fail with a typed error and
/// the rest of the gateway still works.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the connector auth token.
    #[serde(default = "d_connector_token_env")]
    pub token_env: String,
    /// Per-request HTTP timeout, seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_env: d_connector_token_env(),
            timeout_secs: d_timeout(),
        }
    }
}

fn d_connector_token_env() -> String {
    "RF_CONNECTOR_TOKEN".into()
}

fn d_timeout() -> u64 {
    60
}
