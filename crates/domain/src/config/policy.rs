use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    /// Base URL of the remote policy engine (required in remote mode).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the policy engine auth token.
    #[serde(default = "d_policy_token_env")]
    pub token_env: String,
    /// Evaluation timeout, seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// Token budget a single task's LLM usage may not exceed.
    #[serde(default = "d_token_budget")]
    pub task_token_budget: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Embedded,
            url: None,
            token_env: d_policy_token_env(),
            timeout_secs: d_timeout(),
            task_token_budget: d_token_budget(),
        }
    }
}

fn d_policy_token_env() -> String {
    "RF_POLICY_TOKEN".into()
}

fn d_timeout() -> u64 {
    5
}

fn d_token_budget() -> u64 {
    200_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// Built-in declarative rule set.
    #[default]
    Embedded,
    /// POST evaluation requests to an external engine.
    Remote,
}
