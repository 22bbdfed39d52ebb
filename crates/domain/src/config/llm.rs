use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Provider used when no agent names one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// One fallback provider tried when the primary errors.
    #[serde(default)]
    pub fallback_provider: Option<String>,
    #[serde(default = "d_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Per-org completion requests per minute. Excess fails fast.
    #[serde(default = "d_rpm")]
    pub requests_per_minute: u32,
    /// Completion cache TTL, seconds.
    #[serde(default = "d_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Completion cache capacity (entries).
    #[serde(default = "d_cache_capacity")]
    pub cache_capacity: usize,
    /// Startup policy when providers fail to initialize.
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            default_provider: None,
            fallback_provider: None,
            default_timeout_ms: d_timeout_ms(),
            requests_per_minute: d_rpm(),
            cache_ttl_secs: d_cache_ttl(),
            cache_capacity: d_cache_capacity(),
            startup_policy: LlmStartupPolicy::AllowNone,
        }
    }
}

fn d_timeout_ms() -> u64 {
    30_000
}

fn d_rpm() -> u32 {
    60
}

fn d_cache_ttl() -> u64 {
    900
}

fn d_cache_capacity() -> usize {
    2_048
}

/// Controls how the engine handles provider initialization at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Boot even if zero providers initialize; planning endpoints error
    /// until credentials are configured.
    #[default]
    AllowNone,
    /// Abort startup if no provider successfully initializes.
    RequireOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn d_api_key_env() -> String {
    "RF_LLM_API_KEY".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompat,
    Anthropic,
    /// In-process canned responses; tests and dry-run demos.
    Mock,
}
