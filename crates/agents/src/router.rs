//! The meta-prompt router: free text in, a normalized [`TaskSpec`] and a
//! resolved agent set out. The router never guesses — output that fails
//! parsing even after lenient recovery, or that the model marks
//! unclassifiable, surfaces as `IntentAmbiguous` for human disposition.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use rf_domain::task::{ActionType, Constraints, Environment, TargetSelector, TaskSpec};
use rf_domain::{Error, Result};
use rf_llm::{CompletionRequest, LlmClient, Usage};

use crate::prompts;
use crate::registry::{AgentRegistry, AgentSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model output shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SpecDraft {
    action: Option<String>,
    #[serde(default)]
    target: TargetDraft,
    #[serde(default)]
    constraints: ConstraintsDraft,
    #[serde(default)]
    desired_outcome: String,
}

#[derive(Debug, Default, Deserialize)]
struct TargetDraft {
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    name_glob: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConstraintsDraft {
    #[serde(default)]
    excluded_environments: Vec<String>,
    #[serde(default)]
    max_blast_radius_pct: Option<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The router's resolution of one intent.
#[derive(Debug)]
pub struct RoutedIntent {
    pub spec: TaskSpec,
    pub primary: Arc<AgentSpec>,
    /// Implied secondary agents, in registration order.
    pub secondary: Vec<Arc<AgentSpec>>,
    pub tokens: Usage,
}

pub struct IntentRouter {
    registry: Arc<AgentRegistry>,
    llm: Arc<LlmClient>,
}

impl IntentRouter {
    pub fn new(registry: Arc<AgentRegistry>, llm: Arc<LlmClient>) -> Self {
        Self { registry, llm }
    }

    /// Convert free text into a validated spec plus the agents to run.
    pub async fn route(
        &self,
        org_id: Uuid,
        env_hint: Option<Environment>,
        intent: &str,
    ) -> Result<RoutedIntent> {
        let prompt = prompts::render(prompts::TASK_SPEC_ROUTER, &[("intent", intent)]);
        let env_label = env_hint.map(|e| e.to_string()).unwrap_or_else(|| "any".into());

        let completion = self
            .llm
            .complete(
                "router",
                org_id,
                &env_label,
                intent,
                CompletionRequest {
                    prompt,
                    temperature: Some(0.0),
                    json_mode: true,
                    ..CompletionRequest::default()
                },
            )
            .await?;

        let draft: SpecDraft = match serde_json::from_value(completion.parsed.clone()) {
            Ok(draft) => draft,
            Err(_) => {
                return Err(Error::IntentAmbiguous { raw: completion.text });
            }
        };

        let Some(action_str) = draft.action else {
            return Err(Error::IntentAmbiguous { raw: completion.text });
        };
        let Some(action) = parse_action(&action_str) else {
            return Err(Error::IntentAmbiguous { raw: completion.text });
        };

        let environment = match draft.target.environment.as_deref() {
            Some(s) => match s.parse::<Environment>() {
                Ok(env) => Some(env),
                Err(_) => env_hint,
            },
            None => env_hint,
        };

        let spec = TaskSpec {
            action,
            target: TargetSelector {
                platform: draft.target.platform,
                environment,
                tags: draft.target.tags,
                name_glob: draft.target.name_glob,
            },
            constraints: Constraints {
                maintenance_window: None,
                excluded_environments: draft
                    .constraints
                    .excluded_environments
                    .iter()
                    .filter_map(|s| s.parse().ok())
                    .collect(),
                max_blast_radius_pct: draft.constraints.max_blast_radius_pct,
            },
            desired_outcome: if draft.desired_outcome.is_empty() {
                intent.to_string()
            } else {
                draft.desired_outcome
            },
        };

        let primary = self
            .registry
            .for_action(action)
            .ok_or_else(|| Error::Config(format!("no agent registered for {action:?}")))?;
        let secondary = self.registry.secondary_for(action);

        tracing::info!(
            action = action.as_str(),
            primary = %primary.id,
            secondary = secondary.len(),
            cache_hit = completion.cache_hit,
            "routed intent"
        );

        Ok(RoutedIntent {
            spec,
            primary,
            secondary,
            tokens: completion.tokens,
        })
    }
}

fn parse_action(s: &str) -> Option<ActionType> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
