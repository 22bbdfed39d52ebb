//! The specialist agent catalog.
//!
//! Ten agents, each owning one intent slice: a prompt template, the tool
//! set it may call, the artifact family it produces, and its retry
//! budget for malformed model output. The registry doubles as the
//! authorizer consulted by the invocation gate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use rf_domain::task::ActionType;
use rf_tools::Authorizer;

use crate::prompts;

#[derive(Debug, Clone, Serialize)]
pub struct AgentSpec {
    pub id: String,
    pub description: String,
    /// The action family this agent is primary for.
    pub action: ActionType,
    /// Prompt template with `{intent}`, `{context}`, `{tools}` slots.
    #[serde(skip)]
    pub prompt_template: &'static str,
    pub permitted_tools: Vec<String>,
    pub artifact_kind: String,
    /// Model override; `None` uses the org default.
    pub preferred_model: Option<String>,
    /// Retries when the model returns output that fails extraction.
    pub max_output_retries: u32,
}

pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentSpec>>,
    by_action: HashMap<ActionType, String>,
}

impl AgentRegistry {
    /// The built-in ten specialists.
    pub fn builtin() -> Self {
        let specs = vec![
            AgentSpec {
                id: "drift".into(),
                description: "Detects and remediates configuration drift".into(),
                action: ActionType::DriftRemediate,
                prompt_template: prompts::DRIFT_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "drift.report".into(),
                    "config.apply".into(),
                ],
                artifact_kind: "drift_remediation_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "patch".into(),
                description: "Plans and executes patch rollouts".into(),
                action: ActionType::PatchRollout,
                prompt_template: prompts::PATCH_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "patch.list_available".into(),
                    "patch.apply".into(),
                    "patch.revert".into(),
                ],
                artifact_kind: "patch_rollout_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "compliance".into(),
                description: "Audits fleets against compliance baselines".into(),
                action: ActionType::ComplianceAudit,
                prompt_template: prompts::COMPLIANCE_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "compliance.evidence".into(),
                    "sbom.query".into(),
                ],
                artifact_kind: "compliance_report_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "dr".into(),
                description: "Plans disaster-recovery drills and failovers".into(),
                action: ActionType::DrDrill,
                prompt_template: prompts::DR_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "replication.status".into(),
                    "failover.execute".into(),
                    "failover.revert".into(),
                ],
                artifact_kind: "dr_runbook_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "security".into(),
                description: "Scans for vulnerabilities and plans mitigations".into(),
                action: ActionType::SecurityScan,
                prompt_template: prompts::SECURITY_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "cve.query".into(),
                    "sbom.query".into(),
                ],
                artifact_kind: "compliance_report_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "cost".into(),
                description: "Finds and applies cost optimizations".into(),
                action: ActionType::CostOptimize,
                prompt_template: prompts::COST_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "billing.usage".into(),
                    "compute.resize".into(),
                ],
                artifact_kind: "execution_plan_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "image".into(),
                description: "Refreshes golden images across platforms".into(),
                action: ActionType::ImageRefresh,
                prompt_template: prompts::IMAGE_AGENT,
                permitted_tools: vec![
                    "image.list".into(),
                    "image.build".into(),
                    "compute.reimage".into(),
                ],
                artifact_kind: "execution_plan_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "sop".into(),
                description: "Generates standard operating procedures".into(),
                action: ActionType::SopGenerate,
                prompt_template: prompts::SOP_AGENT,
                permitted_tools: vec!["inventory.list".into(), "drift.report".into()],
                artifact_kind: "dr_runbook_v1".into(),
                preferred_model: None,
                max_output_retries: 3,
            },
            AgentSpec {
                id: "adapter".into(),
                description: "Synchronizes platform connector state".into(),
                action: ActionType::AdapterSync,
                prompt_template: prompts::ADAPTER_AGENT,
                permitted_tools: vec!["inventory.list".into(), "adapter.sync".into()],
                artifact_kind: "execution_plan_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
            AgentSpec {
                id: "incident".into(),
                description: "Triages incidents and proposes remediations".into(),
                action: ActionType::IncidentTriage,
                prompt_template: prompts::INCIDENT_AGENT,
                permitted_tools: vec![
                    "inventory.list".into(),
                    "metrics.query".into(),
                    "drift.report".into(),
                ],
                artifact_kind: "execution_plan_v1".into(),
                preferred_model: None,
                max_output_retries: 2,
            },
        ];

        let mut agents = HashMap::new();
        let mut by_action = HashMap::new();
        for spec in specs {
            by_action.insert(spec.action, spec.id.clone());
            agents.insert(spec.id.clone(), Arc::new(spec));
        }
        Self { agents, by_action }
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentSpec>> {
        self.agents.get(id).cloned()
    }

    pub fn for_action(&self, action: ActionType) -> Option<Arc<AgentSpec>> {
        let id = self.by_action.get(&action)?;
        self.get(id)
    }

    /// Secondary agents an action implies, in registration order. A
    /// patch rollout implies a compliance check; an image refresh
    /// implies a security scan.
    pub fn secondary_for(&self, action: ActionType) -> Vec<Arc<AgentSpec>> {
        let ids: &[&str] = match action {
            ActionType::PatchRollout => &["compliance"],
            ActionType::ImageRefresh => &["security"],
            _ => &[],
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Specs sorted by id, for introspection.
    pub fn list(&self) -> Vec<Arc<AgentSpec>> {
        let mut list: Vec<Arc<AgentSpec>> = self.agents.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Authorizer for AgentRegistry {
    fn is_permitted(&self, agent: &str, tool: &str) -> bool {
        // The engine itself (rollback, simulation) runs unconstrained.
        if agent == "engine" {
            return true;
        }
        self.agents
            .get(agent)
            .is_some_and(|spec| spec.permitted_tools.iter().any(|t| t == tool))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
