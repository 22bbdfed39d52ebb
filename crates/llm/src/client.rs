//! The completion client every agent call goes through: semantic cache,
//! per-org rate limit, breaker-guarded provider call with one fallback,
//! and typed JSON extraction from the response.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use rf_breaker::{client_errors_are_soft, BreakerKey, BreakerRegistry};
use rf_domain::{Error, Result};

use crate::cache::{cache_key, CompletionCache};
use crate::extract::{extract_json, ExtractionMethod};
use crate::ratelimit::RateLimiter;
use crate::registry::ProviderRegistry;
use crate::traits::{CompletionProvider, CompletionRequest, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub text: String,
    /// JSON value extracted from the raw text.
    pub parsed: serde_json::Value,
    pub tokens: Usage,
    pub cache_hit: bool,
    /// Times the underlying cache entry has been served (0 on miss).
    pub hit_count: u64,
    /// How the JSON was recovered from the raw text.
    pub method: ExtractionMethod,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LlmClient {
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn CompletionCache>,
    limiter: RateLimiter,
    breakers: Arc<BreakerRegistry>,
}

impl LlmClient {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn CompletionCache>,
        breakers: Arc<BreakerRegistry>,
        requests_per_minute: u32,
    ) -> Self {
        Self {
            registry,
            cache,
            limiter: RateLimiter::new(requests_per_minute),
            breakers,
        }
    }

    /// Complete `req` for `(agent, org, env, intent)`.
    ///
    /// The intent identifies the call for caching; `req.prompt` carries
    /// the full rendered prompt (context, tool catalog, output schema).
    /// Two calls with byte-identical normalized intents within the cache
    /// TTL share one provider completion.
    pub async fn complete(
        &self,
        agent: &str,
        org_id: Uuid,
        env: &str,
        intent: &str,
        req: CompletionRequest,
    ) -> Result<CompletionResult> {
        let key = cache_key(agent, org_id, env, intent);

        if let Some(cached) = self.cache.get(&key) {
            let (parsed, method) = extract_json(&cached.text)?;
            tracing::debug!(agent, %org_id, hit_count = cached.hit_count, "completion cache hit");
            return Ok(CompletionResult {
                text: cached.text,
                parsed,
                tokens: cached.usage,
                cache_hit: true,
                hit_count: cached.hit_count,
                method,
            });
        }

        self.limiter.check(org_id)?;

        let primary = self
            .registry
            .primary()
            .ok_or_else(|| Error::LlmUnavailable("no provider configured".into()))?;

        let response = match self.call_provider(&primary, org_id, req.clone()).await {
            Ok(response) => response,
            Err(err) if err.is_retryable() => match self.registry.fallback() {
                Some(fallback) => {
                    tracing::warn!(
                        primary = primary.provider_id(),
                        fallback = fallback.provider_id(),
                        error = %err,
                        "primary provider failed, trying fallback"
                    );
                    self.call_provider(&fallback, org_id, req).await.map_err(|e| {
                        Error::LlmUnavailable(format!(
                            "primary and fallback providers failed: {e}"
                        ))
                    })?
                }
                None => return Err(Error::LlmUnavailable(err.to_string())),
            },
            Err(err) => return Err(err),
        };

        let (parsed, method) = extract_json(&response.text)?;
        self.cache
            .put(&key, response.text.clone(), response.usage);

        Ok(CompletionResult {
            text: response.text,
            parsed,
            tokens: response.usage,
            cache_hit: false,
            hit_count: 0,
            method,
        })
    }

    /// [`Self::complete`] plus deserialization into the caller's type.
    pub async fn complete_typed<T: DeserializeOwned>(
        &self,
        agent: &str,
        org_id: Uuid,
        env: &str,
        intent: &str,
        req: CompletionRequest,
    ) -> Result<(T, CompletionResult)> {
        let result = self.complete(agent, org_id, env, intent, req).await?;
        let typed = serde_json::from_value(result.parsed.clone())
            .map_err(|e| Error::SchemaInvalid(format!("model output: {e}")))?;
        Ok((typed, result))
    }

    async fn call_provider(
        &self,
        provider: &Arc<dyn CompletionProvider>,
        org_id: Uuid,
        req: CompletionRequest,
    ) -> Result<crate::traits::CompletionResponse> {
        let key = BreakerKey::new("llm", provider.provider_id(), org_id);
        self.breakers
            .call(&key, client_errors_are_soft, || provider.complete(req))
            .await
    }

    /// Periodic maintenance: drop idle rate-limit windows.
    pub fn prune_idle(&self) {
        self.limiter.prune_idle();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
