use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use rf_agents::{AgentPlanner, AgentRegistry, IntentRouter};
use rf_breaker::BreakerRegistry;
use rf_domain::config::Config;
use rf_domain::event::Event;
use rf_domain::plan::Plan;
use rf_llm::registry::ProviderRegistry;
use rf_llm::LlmClient;
use rf_tools::{InvocationGate, InvocationLog, ToolRegistry};
use rf_validation::ValidationPipeline;
use rf_workflow::WorkflowEngine;

use crate::pipeline::{ApprovalLedger, HistoryStore, PlanCache};
use crate::store::TaskStore;
use crate::tenant::TenantGuard;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, LLM client, provider registry
/// - **Intent & planning** — agents, router, planner
/// - **Execution** — tool registry, gate, validation, workflow engine
/// - **Records** — tasks, plans, invocation log, history, approvals
/// - **Guards** — tenant quotas, breakers
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<LlmClient>,
    pub providers: Arc<ProviderRegistry>,

    // ── Intent & planning ─────────────────────────────────────────────
    pub agents: Arc<AgentRegistry>,
    pub router: Arc<IntentRouter>,
    pub planner: Arc<AgentPlanner>,

    // ── Execution ─────────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
    pub gate: Arc<InvocationGate>,
    pub validation: Arc<ValidationPipeline>,
    pub engine: Arc<WorkflowEngine>,

    // ── Records ───────────────────────────────────────────────────────
    pub tasks: Arc<TaskStore>,
    pub plans: Arc<RwLock<HashMap<Uuid, Plan>>>,
    pub plan_cache: Arc<PlanCache>,
    pub invocations: Arc<InvocationLog>,
    pub history: Arc<HistoryStore>,
    pub approvals: Arc<ApprovalLedger>,

    // ── Guards & plumbing ─────────────────────────────────────────────
    pub tenants: Arc<TenantGuard>,
    pub breakers: Arc<BreakerRegistry>,
    /// Shared lifecycle event bus (engine + pipeline publish to it).
    pub events: broadcast::Sender<Event>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
