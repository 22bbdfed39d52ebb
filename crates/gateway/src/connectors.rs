//! Binding of the uniform connector capability set into the tool
//! registry. One HTTP handler per tool, all pointed at the connector
//! service's `/invoke` interface; the engine never links cloud SDKs.

use std::sync::Arc;

use serde::Deserialize;

use rf_domain::config::ConnectorConfig;
use rf_domain::tool::{InverseOp, RiskTier, ToolDescriptor, ToolScope};
use rf_domain::{Error, Result};
use rf_tools::{InvocationCtx, ToolHandler, ToolOutput, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP connector handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Forwards `{tool, params}` to the connector service and maps its
/// `{result, inverse_op?}` reply into a [`ToolOutput`].
pub struct HttpConnectorHandler {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    tool: String,
}

#[derive(Deserialize)]
struct ConnectorReply {
    result: serde_json::Value,
    #[serde(default)]
    inverse_op: Option<InverseOp>,
}

impl HttpConnectorHandler {
    fn new(config: &ConnectorConfig, base_url: String, tool: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: std::env::var(&config.token_env).ok(),
            tool,
        })
    }
}

#[async_trait::async_trait]
impl ToolHandler for HttpConnectorHandler {
    async fn invoke(&self, params: serde_json::Value, ctx: &InvocationCtx) -> Result<ToolOutput> {
        let body = serde_json::json!({
            "tool": self.tool,
            "params": params,
            "org_id": ctx.org_id,
            "run_id": ctx.run_id,
        });
        let mut request = self
            .client
            .post(format!("{}/invoke", self.base_url))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ToolFailed {
                tool: self.tool.clone(),
                message: format!("connector returned {status}"),
            });
        }
        let reply: ConnectorReply = response.json().await.map_err(|e| Error::ToolFailed {
            tool: self.tool.clone(),
            message: format!("malformed connector reply: {e}"),
        })?;
        Ok(ToolOutput {
            result: reply.result,
            inverse: reply.inverse_op,
        })
    }
}

/// Placeholder bound when no connector service is configured: the
/// gateway boots, tool calls fail with a typed error.
pub struct UnboundHandler {
    tool: String,
}

#[async_trait::async_trait]
impl ToolHandler for UnboundHandler {
    async fn invoke(&self, _params: serde_json::Value, _ctx: &InvocationCtx) -> Result<ToolOutput> {
        Err(Error::FeatureDisabled(format!(
            "tool {} has no connector bound (set connector.url)",
            self.tool
        )))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The capability set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Descriptor table for the uniform capability set. Risk tiers, scopes
/// and idempotency here are what the gate and risk engine reason over.
fn capability_set() -> Vec<ToolDescriptor> {
    let asset_params = serde_json::json!({
        "type": "object",
        "properties": { "asset": { "type": "string" } },
        "required": ["asset"]
    });
    let selector_params = serde_json::json!({
        "type": "object",
        "properties": {
            "platform": { "type": "string" },
            "environment": { "type": "string" },
            "tags": { "type": "object" },
            "name_glob": { "type": "string" }
        }
    });
    let object_result = serde_json::json!({ "type": "object" });

    let tool = |name: &str,
                description: &str,
                params: &serde_json::Value,
                risk: RiskTier,
                scope: ToolScope,
                idempotent: bool,
                cost: f64| ToolDescriptor {
        name: name.into(),
        version: "1.0".into(),
        description: description.into(),
        parameters: params.clone(),
        result_schema: object_result.clone(),
        risk,
        scope,
        idempotent,
        capabilities: vec![],
        cost_estimate: cost,
        timeout_secs: 60,
    };

    vec![
        tool("inventory.list", "List assets matching a target selector", &selector_params, RiskTier::Read, ToolScope::Org, true, 0.1),
        tool("drift.report", "Read the drift report for an asset or selector", &selector_params, RiskTier::Read, ToolScope::Site, true, 0.2),
        tool("config.apply", "Apply the desired configuration to an asset", &asset_params, RiskTier::MutateMedium, ToolScope::Asset, true, 1.0),
        tool("patch.list_available", "List applicable patches for an asset", &asset_params, RiskTier::Read, ToolScope::Asset, true, 0.2),
        tool("patch.apply", "Apply pending patches to an asset", &asset_params, RiskTier::MutateMedium, ToolScope::Asset, true, 1.0),
        tool("patch.revert", "Revert the last patch set on an asset", &asset_params, RiskTier::MutateMedium, ToolScope::Asset, true, 1.0),
        tool("compliance.evidence", "Fetch compliance evidence for a selector", &selector_params, RiskTier::Read, ToolScope::Org, true, 0.3),
        tool("sbom.query", "Query SBOM contents for an asset", &asset_params, RiskTier::Read, ToolScope::Asset, true, 0.2),
        tool("cve.query", "Query known CVEs affecting an asset", &asset_params, RiskTier::Read, ToolScope::Asset, true, 0.2),
        tool("replication.status", "Read replication lag for a DR pair", &asset_params, RiskTier::Read, ToolScope::Site, true, 0.2),
        tool("failover.execute", "Fail a workload over to its DR site", &asset_params, RiskTier::MutateHigh, ToolScope::Site, false, 5.0),
        tool("failover.revert", "Fail a workload back to its primary site", &asset_params, RiskTier::MutateHigh, ToolScope::Site, false, 5.0),
        tool("billing.usage", "Read billing usage for a selector", &selector_params, RiskTier::Read, ToolScope::Org, true, 0.1),
        tool("compute.resize", "Resize a compute instance", &asset_params, RiskTier::MutateHigh, ToolScope::Asset, false, 2.0),
        tool("compute.reimage", "Reimage an instance from the golden image", &asset_params, RiskTier::MutateHigh, ToolScope::Asset, false, 3.0),
        tool("compute.terminate", "Terminate an instance permanently", &asset_params, RiskTier::Destructive, ToolScope::Asset, false, 4.0),
        tool("image.list", "List golden images for a platform", &selector_params, RiskTier::Read, ToolScope::Org, true, 0.1),
        tool("image.build", "Build a new golden image revision", &selector_params, RiskTier::MutateLow, ToolScope::Org, false, 3.0),
        tool("adapter.sync", "Reconcile connector adapter state", &selector_params, RiskTier::MutateLow, ToolScope::Org, true, 0.5),
        tool("metrics.query", "Query a metric series for assets", &selector_params, RiskTier::Read, ToolScope::Asset, true, 0.1),
    ]
}

/// Register the capability set, binding each tool to the connector
/// service or to the unbound placeholder.
pub fn register_capability_set(registry: &ToolRegistry, config: &ConnectorConfig) -> Result<()> {
    for descriptor in capability_set() {
        let handler: Arc<dyn ToolHandler> = match &config.url {
            Some(url) => Arc::new(HttpConnectorHandler::new(
                config,
                url.trim_end_matches('/').to_string(),
                descriptor.name.clone(),
            )?),
            None => Arc::new(UnboundHandler {
                tool: descriptor.name.clone(),
            }),
        };
        registry.register(descriptor, handler)?;
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn capability_set_registers_cleanly() {
        let registry = ToolRegistry::new();
        register_capability_set(&registry, &ConnectorConfig::default()).unwrap();
        assert_eq!(registry.len(), 20);
        assert!(registry.get("inventory.list").is_some());
        assert!(registry.get("compute.terminate").is_some());
    }

    #[test]
    fn terminate_is_the_only_destructive_tool() {
        let destructive: Vec<String> = capability_set()
            .into_iter()
            .filter(|d| d.risk == RiskTier::Destructive)
            .map(|d| d.name)
            .collect();
        assert_eq!(destructive, vec!["compute.terminate"]);
    }

    #[test]
    fn agent_tool_references_resolve() {
        // Every tool an agent declares must exist in the capability set.
        let names: Vec<String> = capability_set().into_iter().map(|d| d.name).collect();
        let agents = rf_agents::AgentRegistry::builtin();
        for agent in agents.list() {
            for tool in &agent.permitted_tools {
                assert!(names.contains(tool), "agent {} references unknown tool {tool}", agent.id);
            }
        }
    }

    #[tokio::test]
    async fn unbound_handler_fails_typed() {
        let handler = UnboundHandler { tool: "patch.apply".into() };
        let err = handler
            .invoke(
                serde_json::json!({"asset": "web-1"}),
                &InvocationCtx::internal(Uuid::new_v4(), Uuid::new_v4(), "patch"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FeatureDisabled(_)));
    }
}
