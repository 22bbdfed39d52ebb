//! Plan generation: run the primary agent (and any implied secondaries)
//! against the LLM and assemble one [`Plan`].
//!
//! Multi-agent outputs merge deterministically: the primary's artifact is
//! the base, secondary top-level keys never overwrite existing ones, and
//! secondary phases are appended in agent registration order. Every merge
//! records a plan warning naming the contributing agent.

use std::sync::Arc;

use uuid::Uuid;

use rf_domain::plan::{BatchRule, Phase, Plan};
use rf_domain::task::{Environment, TaskSpec};
use rf_domain::{Error, Result};
use rf_llm::{CompletionRequest, LlmClient, Usage};

use crate::prompts;
use crate::registry::AgentSpec;

pub struct AgentPlanner {
    llm: Arc<LlmClient>,
}

/// A generated plan plus the tokens all participating agents consumed.
#[derive(Debug)]
pub struct PlannedTask {
    pub plan: Plan,
    pub tokens: Usage,
}

impl AgentPlanner {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Produce a plan for `spec` using `primary` and `secondary` agents.
    pub async fn plan(
        &self,
        task_id: Uuid,
        org_id: Uuid,
        spec: &TaskSpec,
        primary: &AgentSpec,
        secondary: &[Arc<AgentSpec>],
        context: &str,
    ) -> Result<PlannedTask> {
        let mut tokens = Usage::default();

        let mut artifact = self
            .run_agent(org_id, spec, primary, context, &mut tokens)
            .await?;
        let mut warnings = Vec::new();
        let mut tools = primary.permitted_tools.clone();

        // Sequential composition: each secondary sees the merged artifact
        // so far as context and contributes to it.
        for agent in secondary {
            let merged_context = format!(
                "{context}\n\nPrimary agent output:\n{artifact}"
            );
            let addition = self
                .run_agent(org_id, spec, agent, &merged_context, &mut tokens)
                .await?;
            merge_artifact(&mut artifact, addition, &agent.id, &mut warnings);
            for tool in &agent.permitted_tools {
                if !tools.contains(tool) {
                    tools.push(tool.clone());
                }
            }
        }

        let phases = phases_from_artifact(&artifact);
        let summary = artifact
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or(&spec.desired_outcome)
            .to_string();

        let mut plan = Plan::new(
            task_id,
            spec,
            primary.artifact_kind.clone(),
            summary,
            phases,
            tools,
            artifact,
        );
        plan.warnings = warnings;

        Ok(PlannedTask { plan, tokens })
    }

    async fn run_agent(
        &self,
        org_id: Uuid,
        spec: &TaskSpec,
        agent: &AgentSpec,
        context: &str,
        tokens: &mut Usage,
    ) -> Result<serde_json::Value> {
        let env_label = spec
            .target
            .environment
            .map(Environment::as_str)
            .unwrap_or("any");
        let tool_catalog = agent.permitted_tools.join("\n");
        let prompt = prompts::render(
            agent.prompt_template,
            &[
                ("intent", spec.desired_outcome.as_str()),
                ("context", context),
                ("tools", tool_catalog.as_str()),
            ],
        );

        // Retry malformed output up to the agent's budget; the cache key
        // is varied per attempt so a bad completion is not replayed.
        let mut last_err = None;
        for attempt in 0..=agent.max_output_retries {
            let intent_key = if attempt == 0 {
                spec.desired_outcome.clone()
            } else {
                format!("{} retry-{attempt}", spec.desired_outcome)
            };
            let result = self
                .llm
                .complete(
                    &agent.id,
                    org_id,
                    env_label,
                    &intent_key,
                    CompletionRequest {
                        prompt: prompt.clone(),
                        model: agent.preferred_model.clone(),
                        temperature: Some(0.0),
                        json_mode: true,
                        ..CompletionRequest::default()
                    },
                )
                .await;
            match result {
                Ok(completion) => {
                    tokens.input_tokens += completion.tokens.input_tokens;
                    tokens.output_tokens += completion.tokens.output_tokens;
                    if completion.parsed.is_object() {
                        return Ok(completion.parsed);
                    }
                    last_err = Some(Error::SchemaInvalid(format!(
                        "agent {} produced a non-object artifact",
                        agent.id
                    )));
                }
                Err(err @ Error::SchemaInvalid(_)) => {
                    tracing::warn!(agent = %agent.id, attempt, "malformed agent output, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Other("agent produced no output".into())))
    }
}

/// First-writer-wins merge of a secondary artifact into the base.
fn merge_artifact(
    base: &mut serde_json::Value,
    addition: serde_json::Value,
    agent_id: &str,
    warnings: &mut Vec<String>,
) {
    let serde_json::Value::Object(addition) = addition else {
        warnings.push(format!("agent {agent_id}: non-object artifact ignored"));
        return;
    };
    let Some(base_map) = base.as_object_mut() else {
        return;
    };

    warnings.push(format!("merged output from secondary agent {agent_id}"));

    for (key, value) in addition {
        if key == "phases" {
            // Phases append rather than overwrite.
            let incoming = value.as_array().cloned().unwrap_or_default();
            let target = base_map
                .entry("phases")
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let Some(target) = target.as_array_mut() {
                target.extend(incoming);
            }
        } else if base_map.contains_key(&key) {
            warnings.push(format!(
                "agent {agent_id}: key {key} ignored (first writer wins)"
            ));
        } else {
            base_map.insert(key, value);
        }
    }
}

/// Pull explicit phase cohorts out of an artifact body. Artifacts that
/// carry no usable phase list yield an empty vec; the submission
/// pipeline then applies the risk-recommended default shape.
fn phases_from_artifact(artifact: &serde_json::Value) -> Vec<Phase> {
    let Some(entries) = artifact.get("phases").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let assets: Vec<String> = entry
                .get("assets")?
                .as_array()?
                .iter()
                .filter_map(|a| a.as_str().map(String::from))
                .collect();
            let canary = name.to_ascii_lowercase().contains("canary");
            Some(Phase {
                name,
                batch: BatchRule::Assets { assets },
                wait_secs: if canary { 600 } else { 300 },
                timeout_secs: 3_600,
                canary,
                rollback_threshold: 0.2,
                max_parallel: 4,
                metric_template: canary.then(|| "standard".to_string()),
                preconditions: Vec::new(),
                strict_non_empty: canary,
            })
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
