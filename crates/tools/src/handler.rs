//! The seam between the engine and platform connectors.
//!
//! Connectors implement [`ToolHandler`] per tool; the engine never links
//! cloud SDKs directly. A mutating handler returns the structured inverse
//! operation that undoes its effect, sufficient for the gate to re-enter
//! `invoke` on rollback without re-planning.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rf_domain::autonomy::AutonomyMode;
use rf_domain::tool::InverseOp;
use rf_domain::Result;

/// What a tool call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    /// Inverse operation for the rollback stack. `None` for read-only
    /// tools and for mutations that cannot be undone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<InverseOp>,
}

impl ToolOutput {
    pub fn read_only(result: serde_json::Value) -> Self {
        Self { result, inverse: None }
    }

    pub fn with_inverse(result: serde_json::Value, inverse: InverseOp) -> Self {
        Self { result, inverse: Some(inverse) }
    }
}

/// Everything the gate knows about the call site, passed to policy and
/// handlers alike.
#[derive(Debug, Clone)]
pub struct InvocationCtx {
    pub org_id: Uuid,
    pub task_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    /// Agent requesting the call.
    pub agent: String,
    pub autonomy_mode: AutonomyMode,
    /// An explicit approval record exists for this task.
    pub approval_granted: bool,
    /// A dry-run simulation of this plan has completed.
    pub simulation_completed: bool,
    /// Plan quality total, 0-100.
    pub quality_total: u8,
    /// LLM tokens this task has consumed so far.
    pub tokens_used: u64,
    /// Exercise the gate without dispatching side effects.
    pub dry_run: bool,
}

impl InvocationCtx {
    /// A minimal context for tests and internal reads.
    pub fn internal(org_id: Uuid, run_id: Uuid, agent: impl Into<String>) -> Self {
        Self {
            org_id,
            task_id: Uuid::nil(),
            run_id,
            phase: String::new(),
            agent: agent.into(),
            autonomy_mode: AutonomyMode::ApproveAll,
            approval_granted: false,
            simulation_completed: false,
            quality_total: 0,
            tokens_used: 0,
            dry_run: false,
        }
    }
}

/// One bound connector capability.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, params: serde_json::Value, ctx: &InvocationCtx) -> Result<ToolOutput>;
}

/// Receives inverse operations as mutations succeed. Implemented by the
/// workflow run's rollback stack.
pub trait RollbackSink: Send + Sync {
    fn push(&self, op: InverseOp);
}
