//! Anthropic Messages API adapter (`POST {base_url}/v1/messages`).

use serde::{Deserialize, Serialize};

use rf_domain::config::ProviderConfig;
use rf_domain::{Error, Result};

use crate::traits::{CompletionProvider, CompletionRequest, CompletionResponse, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4_096;

pub struct AnthropicProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn from_config(pc: &ProviderConfig, timeout_ms: u64) -> Result<Self> {
        let api_key = std::env::var(&pc.api_key_env).map_err(|_| {
            Error::Config(format!(
                "provider {}: env var {} is not set",
                pc.id, pc.api_key_env
            ))
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            id: pc.id.clone(),
            client,
            base_url: pc.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: pc
                .model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".into()),
        })
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireContent>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[async_trait::async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let body = WireRequest {
            model,
            max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: req.system.as_deref(),
            messages: vec![WireMessage { role: "user", content: &req.prompt }],
            temperature: req.temperature,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider {
                provider: self.id.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("{status}: {body}"),
            });
        }

        let wire: WireResponse = response.json().await.map_err(|e| Error::Provider {
            provider: self.id.clone(),
            message: format!("malformed response: {e}"),
        })?;

        let text = wire
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "no text content".into(),
            })?;

        let usage = wire
            .usage
            .map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            usage,
            model: wire.model.unwrap_or_else(|| model.to_string()),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
