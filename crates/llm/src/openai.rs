//! OpenAI-compatible completion adapter (`POST {base_url}/chat/completions`).
//! Works against any gateway speaking that wire format.

use serde::{Deserialize, Serialize};

use rf_domain::config::ProviderConfig;
use rf_domain::{Error, Result};

use crate::traits::{CompletionProvider, CompletionRequest, CompletionResponse, Usage};

pub struct OpenAiCompatProvider {
    id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl OpenAiCompatProvider {
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
            default_model: pc.model.clone().unwrap_or_else(|| "gpt-4o".into()),
        })
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait::async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let model = req.model.as_deref().unwrap_or(&self.default_model);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = req.system.as_deref() {
            messages.push(WireMessage { role: "system", content: system });
        }
        messages.push(WireMessage { role: "user", content: &req.prompt });

        let body = WireRequest {
            model,
            messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            response_format: req
                .json_mode
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                message: "empty choices".into(),
            })?;

        let usage = wire
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
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
