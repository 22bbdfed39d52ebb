//! Provider registry.
//!
//! Constructs and holds all configured completion providers. At startup
//! the registry reads the [`LlmConfig`], resolves API keys from the
//! environment, and instantiates the appropriate adapter for each entry.
//! Providers that fail to initialize are recorded (with secrets masked)
//! rather than aborting startup, unless the startup policy requires one.

use std::collections::HashMap;
use std::sync::Arc;

use rf_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use rf_domain::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::mock::MockProvider;
use crate::openai::OpenAiCompatProvider;
use crate::traits::CompletionProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CompletionProvider>>,
    default_provider: Option<String>,
    fallback_provider: Option<String>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens so raw
/// secrets never reach logs or readiness endpoints.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn CompletionProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(pc, config.default_timeout_ms)
                        .map(|p| Arc::new(p) as Arc<dyn CompletionProvider>)
                }
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(pc, config.default_timeout_ms)
                        .map(|p| Arc::new(p) as Arc<dyn CompletionProvider>)
                }
                ProviderKind::Mock => Ok(Arc::new(
                    MockProvider::new(pc.id.clone()).with_fallback("{}"),
                ) as Arc<dyn CompletionProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        if providers.is_empty()
            && !config.providers.is_empty()
            && config.startup_policy == LlmStartupPolicy::RequireOne
        {
            return Err(Error::Config(
                "all configured LLM providers failed to initialize \
                 (startup_policy = require_one)"
                    .into(),
            ));
        }

        Ok(Self {
            providers,
            default_provider: config.default_provider.clone(),
            fallback_provider: config.fallback_provider.clone(),
            init_errors,
        })
    }

    /// Registry with explicit instances, bypassing config. Test wiring.
    pub fn from_providers(
        providers: Vec<Arc<dyn CompletionProvider>>,
        default_provider: Option<String>,
        fallback_provider: Option<String>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.provider_id().to_string(), p))
            .collect();
        Self {
            providers,
            default_provider,
            fallback_provider,
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// The provider used when the caller names none: the configured
    /// default, or the only registered provider.
    pub fn primary(&self) -> Option<Arc<dyn CompletionProvider>> {
        if let Some(id) = &self.default_provider {
            return self.get(id);
        }
        if self.providers.len() == 1 {
            return self.providers.values().next().cloned();
        }
        None
    }

    /// The configured fallback provider, if it differs from the primary.
    pub fn fallback(&self) -> Option<Arc<dyn CompletionProvider>> {
        let id = self.fallback_provider.as_deref()?;
        if self.default_provider.as_deref() == Some(id) {
            return None;
        }
        self.get(id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
