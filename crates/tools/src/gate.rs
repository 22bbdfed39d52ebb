//! The invocation gate: the single path every tool call takes.
//!
//! In order: parameter schema validation, agent authorization, policy
//! evaluation, circuit-breaker admission, the timed invocation itself,
//! the audit-log append, and (for successful mutations) the push of the
//! inverse operation onto the run's rollback stack. Non-idempotent tools
//! are deduplicated by an idempotency key within a workflow execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use rf_breaker::{no_soft_errors, BreakerKey, BreakerRegistry};
use rf_domain::tool::{
    idempotency_key, redact_params, InvocationOutcome, ToolInvocation,
};
use rf_domain::{Error, Result};

use crate::handler::{InvocationCtx, RollbackSink, ToolOutput};
use crate::log::InvocationLog;
use crate::registry::{RegisteredTool, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Answers whether an agent may call a tool. Implemented by the agent
/// registry's permitted tool sets.
pub trait Authorizer: Send + Sync {
    fn is_permitted(&self, agent: &str, tool: &str) -> bool;
}

/// Permit-everything authorizer for internal engine calls.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_permitted(&self, _agent: &str, _tool: &str) -> bool {
        true
    }
}

/// Per-invocation policy check, evaluated with full context. The
/// embedded implementation lives in the validation crate.
#[async_trait::async_trait]
pub trait GatePolicy: Send + Sync {
    async fn check_invocation(
        &self,
        descriptor: &rf_domain::tool::ToolDescriptor,
        ctx: &InvocationCtx,
    ) -> Result<()>;
}

/// Policy that admits everything; tests only.
pub struct PermissivePolicy;

#[async_trait::async_trait]
impl GatePolicy for PermissivePolicy {
    async fn check_invocation(
        &self,
        _descriptor: &rf_domain::tool::ToolDescriptor,
        _ctx: &InvocationCtx,
    ) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InvocationGate {
    registry: Arc<ToolRegistry>,
    authorizer: Arc<dyn Authorizer>,
    policy: Arc<dyn GatePolicy>,
    breakers: Arc<BreakerRegistry>,
    log: Arc<InvocationLog>,
    /// Cached results for non-idempotent calls, keyed per run so the
    /// whole set drops when a run finishes.
    dedupe: Mutex<HashMap<Uuid, HashMap<String, serde_json::Value>>>,
}

impl InvocationGate {
    pub fn new(
        registry: Arc<ToolRegistry>,
        authorizer: Arc<dyn Authorizer>,
        policy: Arc<dyn GatePolicy>,
        breakers: Arc<BreakerRegistry>,
        log: Arc<InvocationLog>,
    ) -> Self {
        Self {
            registry,
            authorizer,
            policy,
            breakers,
            log,
            dedupe: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke `tool` with `params` under `ctx`. Successful mutations push
    /// their inverse onto `rollback`.
    pub async fn invoke(
        &self,
        tool: &str,
        params: serde_json::Value,
        ctx: &InvocationCtx,
        rollback: Option<&dyn RollbackSink>,
    ) -> Result<serde_json::Value> {
        let registered = self
            .registry
            .get(tool)
            .ok_or_else(|| Error::NotFound(format!("tool {tool}")))?;
        let descriptor = &registered.descriptor;

        // (i) Parameter schema validation.
        if let Err(errors) = registered.schema.validate(&params) {
            let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(Error::SchemaInvalid(format!(
                "{tool} parameters: {}",
                detail.join("; ")
            )));
        }

        // (ii) Agent authorization.
        if !self.authorizer.is_permitted(&ctx.agent, tool) {
            return Err(Error::Unauthorized(format!(
                "agent {} may not call {tool}",
                ctx.agent
            )));
        }

        // (iii) Policy evaluation with full context.
        self.policy.check_invocation(descriptor, ctx).await?;

        // Dedupe non-idempotent calls within the same run.
        let dedupe_key = if !descriptor.idempotent {
            let key = idempotency_key(ctx.run_id, &ctx.phase, tool, &params);
            if let Some(cached) = self
                .dedupe
                .lock()
                .get(&ctx.run_id)
                .and_then(|m| m.get(&key))
                .cloned()
            {
                tracing::debug!(tool, key = %key, "deduplicated non-idempotent invocation");
                return Ok(cached);
            }
            Some(key)
        } else {
            None
        };

        // Dry runs exercise the gate but never dispatch mutations.
        if ctx.dry_run && descriptor.risk.is_mutating() {
            let result = serde_json::json!({ "simulated": true, "tool": tool });
            self.append_log(ctx, descriptor, &params, InvocationOutcome::Ok { result: result.clone() }, 0);
            return Ok(result);
        }

        // (iv) Breaker admission + (v) timed invocation.
        let started = std::time::Instant::now();
        let breaker_key = BreakerKey::new("tool", tool, ctx.org_id);
        let timeout = Duration::from_secs(descriptor.timeout_secs);
        let outcome: Result<ToolOutput> = self
            .breakers
            .call(&breaker_key, no_soft_errors, || async {
                match tokio::time::timeout(timeout, registered.handler.invoke(params.clone(), ctx))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "tool {tool} exceeded {}s",
                        descriptor.timeout_secs
                    ))),
                }
            })
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                // (vi) Audit log.
                self.append_log(
                    ctx,
                    descriptor,
                    &params,
                    InvocationOutcome::Ok { result: output.result.clone() },
                    duration_ms,
                );

                // (vii) Rollback stack push for successful mutations.
                if descriptor.risk.is_mutating() {
                    if let (Some(sink), Some(inverse)) = (rollback, output.inverse) {
                        sink.push(inverse);
                    }
                }

                if let (Some(key), result) = (dedupe_key, &output.result) {
                    self.dedupe
                        .lock()
                        .entry(ctx.run_id)
                        .or_default()
                        .insert(key, result.clone());
                }

                Ok(output.result)
            }
            Err(err) => {
                self.append_log(
                    ctx,
                    descriptor,
                    &params,
                    InvocationOutcome::Failed { message: err.to_string() },
                    duration_ms,
                );
                // Wrap transport-level failures so phase accounting sees a
                // tool failure; pass gate-level rejections through.
                match err {
                    Error::BreakerOpen { .. } | Error::Cancelled => Err(err),
                    Error::ToolFailed { .. } => Err(err),
                    other => Err(Error::ToolFailed {
                        tool: tool.to_string(),
                        message: other.to_string(),
                    }),
                }
            }
        }
    }

    fn append_log(
        &self,
        ctx: &InvocationCtx,
        descriptor: &rf_domain::tool::ToolDescriptor,
        params: &serde_json::Value,
        outcome: InvocationOutcome,
        duration_ms: u64,
    ) {
        self.log.append(ToolInvocation {
            id: Uuid::new_v4(),
            task_id: ctx.task_id,
            run_id: ctx.run_id,
            phase: ctx.phase.clone(),
            tool: descriptor.name.clone(),
            params: redact_params(params),
            agent: ctx.agent.clone(),
            outcome,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    /// Drop dedupe state for a finished run.
    pub fn clear_run(&self, run_id: &Uuid) {
        self.dedupe.lock().remove(run_id);
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn log(&self) -> &Arc<InvocationLog> {
        &self.log
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ToolHandler;
    use rf_breaker::BreakerConfig;
    use rf_domain::tool::{InverseOp, RiskTier, ToolDescriptor, ToolScope};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
        inverse: Option<InverseOp>,
        fail: bool,
    }

    impl CountingHandler {
        fn ok() -> Self {
            Self { calls: AtomicU32::new(0), inverse: None, fail: false }
        }

        fn mutating(inverse: InverseOp) -> Self {
            Self { calls: AtomicU32::new(0), inverse: Some(inverse), fail: false }
        }

        fn failing() -> Self {
            Self { calls: AtomicU32::new(0), inverse: None, fail: true }
        }
    }

    #[async_trait::async_trait]
    impl ToolHandler for CountingHandler {
        async fn invoke(&self, params: serde_json::Value, _ctx: &InvocationCtx) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Http("connector 503".into()));
            }
            Ok(ToolOutput {
                result: serde_json::json!({ "echo": params }),
                inverse: self.inverse.clone(),
            })
        }
    }

    #[derive(Default)]
    struct StackSink {
        ops: Mutex<Vec<InverseOp>>,
    }

    impl RollbackSink for StackSink {
        fn push(&self, op: InverseOp) {
            self.ops.lock().push(op);
        }
    }

    struct DenyListAuthorizer;

    impl Authorizer for DenyListAuthorizer {
        fn is_permitted(&self, agent: &str, _tool: &str) -> bool {
            agent != "intruder"
        }
    }

    fn descriptor(name: &str, risk: RiskTier, idempotent: bool) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            version: "1.0".into(),
            description: "test".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "asset": { "type": "string" } },
                "required": ["asset"]
            }),
            result_schema: serde_json::json!({ "type": "object" }),
            risk,
            scope: ToolScope::Asset,
            idempotent,
            capabilities: vec![],
            cost_estimate: 0.0,
            timeout_secs: 5,
        }
    }

    fn gate_with(
        tools: Vec<(ToolDescriptor, Arc<dyn ToolHandler>)>,
    ) -> (InvocationGate, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ToolRegistry::new());
        for (d, h) in tools {
            registry.register(d, h).unwrap();
        }
        registry.seal();
        let gate = InvocationGate::new(
            registry,
            Arc::new(DenyListAuthorizer),
            Arc::new(PermissivePolicy),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            Arc::new(InvocationLog::new(dir.path())),
        );
        (gate, dir)
    }

    fn ctx() -> InvocationCtx {
        InvocationCtx::internal(Uuid::new_v4(), Uuid::new_v4(), "patch")
    }

    #[tokio::test]
    async fn read_tool_invokes_without_rollback_push() {
        let handler = Arc::new(CountingHandler::ok());
        let (gate, _dir) = gate_with(vec![(
            descriptor("inv.read", RiskTier::Read, true),
            handler.clone(),
        )]);
        let sink = StackSink::default();

        let result = gate
            .invoke("inv.read", serde_json::json!({"asset": "web-1"}), &ctx(), Some(&sink))
            .await
            .unwrap();
        assert_eq!(result["echo"]["asset"], "web-1");
        assert!(sink.ops.lock().is_empty());
        assert_eq!(gate.log().len(), 1);
    }

    #[tokio::test]
    async fn mutation_pushes_inverse() {
        let inverse = InverseOp {
            tool: "patch.revert".into(),
            params: serde_json::json!({"asset": "web-1"}),
        };
        let handler = Arc::new(CountingHandler::mutating(inverse.clone()));
        let (gate, _dir) = gate_with(vec![(
            descriptor("patch.apply", RiskTier::MutateMedium, true),
            handler,
        )]);
        let sink = StackSink::default();

        gate.invoke("patch.apply", serde_json::json!({"asset": "web-1"}), &ctx(), Some(&sink))
            .await
            .unwrap();
        assert_eq!(sink.ops.lock().as_slice(), &[inverse]);
    }

    #[tokio::test]
    async fn schema_violation_rejected_before_dispatch() {
        let handler = Arc::new(CountingHandler::ok());
        let (gate, _dir) = gate_with(vec![(
            descriptor("inv.read", RiskTier::Read, true),
            handler.clone(),
        )]);

        let err = gate
            .invoke("inv.read", serde_json::json!({"wrong": 1}), &ctx(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaInvalid(_)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        // Schema rejections happen before the audit log entry.
        assert_eq!(gate.log().len(), 0);
    }

    #[tokio::test]
    async fn unauthorized_agent_rejected() {
        let (gate, _dir) = gate_with(vec![(
            descriptor("inv.read", RiskTier::Read, true),
            Arc::new(CountingHandler::ok()),
        )]);
        let mut bad_ctx = ctx();
        bad_ctx.agent = "intruder".into();

        let err = gate
            .invoke("inv.read", serde_json::json!({"asset": "a"}), &bad_ctx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_tool_not_found() {
        let (gate, _dir) = gate_with(vec![]);
        let err = gate
            .invoke("ghost.tool", serde_json::json!({}), &ctx(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn handler_failure_becomes_tool_failed_and_is_logged() {
        let (gate, _dir) = gate_with(vec![(
            descriptor("patch.apply", RiskTier::MutateMedium, true),
            Arc::new(CountingHandler::failing()),
        )]);
        let call_ctx = ctx();
        let err = gate
            .invoke("patch.apply", serde_json::json!({"asset": "a"}), &call_ctx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
        let records = gate.log().for_run(&call_ctx.run_id);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0].outcome, InvocationOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn non_idempotent_calls_deduplicate_within_run() {
        let handler = Arc::new(CountingHandler::ok());
        let (gate, _dir) = gate_with(vec![(
            descriptor("compute.resize", RiskTier::MutateHigh, false),
            handler.clone(),
        )]);
        let call_ctx = ctx();
        let params = serde_json::json!({"asset": "db-1"});

        let a = gate.invoke("compute.resize", params.clone(), &call_ctx, None).await.unwrap();
        let b = gate.invoke("compute.resize", params.clone(), &call_ctx, None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // A different run executes afresh.
        let mut other_run = call_ctx.clone();
        other_run.run_id = Uuid::new_v4();
        gate.invoke("compute.resize", params, &other_run, None).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_run_drops_dedupe_state() {
        let handler = Arc::new(CountingHandler::ok());
        let (gate, _dir) = gate_with(vec![(
            descriptor("compute.resize", RiskTier::MutateHigh, false),
            handler.clone(),
        )]);
        let call_ctx = ctx();
        let params = serde_json::json!({"asset": "db-1"});

        gate.invoke("compute.resize", params.clone(), &call_ctx, None).await.unwrap();
        gate.clear_run(&call_ctx.run_id);
        gate.invoke("compute.resize", params, &call_ctx, None).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dry_run_skips_mutations_but_logs() {
        let handler = Arc::new(CountingHandler::mutating(InverseOp {
            tool: "x".into(),
            params: serde_json::json!({}),
        }));
        let (gate, _dir) = gate_with(vec![(
            descriptor("patch.apply", RiskTier::MutateMedium, true),
            handler.clone(),
        )]);
        let mut dry_ctx = ctx();
        dry_ctx.dry_run = true;
        let sink = StackSink::default();

        let result = gate
            .invoke("patch.apply", serde_json::json!({"asset": "a"}), &dry_ctx, Some(&sink))
            .await
            .unwrap();
        assert_eq!(result["simulated"], true);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert!(sink.ops.lock().is_empty());
        assert_eq!(gate.log().len(), 1);
    }

    #[tokio::test]
    async fn params_are_redacted_in_the_log() {
        let (gate, _dir) = gate_with(vec![(
            descriptor("inv.read", RiskTier::Read, true),
            Arc::new(CountingHandler::ok()),
        )]);
        let call_ctx = ctx();
        // "asset" satisfies the schema; extra keys are allowed by it.
        gate.invoke(
            "inv.read",
            serde_json::json!({"asset": "web-1", "api_key": "sk-secret"}),
            &call_ctx,
            None,
        )
        .await
        .unwrap();
        let records = gate.log().for_run(&call_ctx.run_id);
        assert_eq!(records[0].params["api_key"], "***");
        assert_eq!(records[0].params["asset"], "web-1");
    }
}
