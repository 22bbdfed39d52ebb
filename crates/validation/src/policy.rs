//! Policy evaluation: plan-level verdicts and the per-invocation gate
//! policy. Two engines implement the same trait — an embedded declarative
//! rule set, and a remote HTTP engine for orgs running their own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rf_breaker::{client_errors_are_soft, BreakerKey, BreakerRegistry};
use rf_domain::autonomy::AutonomyMode;
use rf_domain::config::PolicyConfig;
use rf_domain::plan::Plan;
use rf_domain::task::{Environment, TaskSpec};
use rf_domain::tool::{RiskTier, ToolDescriptor};
use rf_domain::{Error, Result};
use rf_tools::{GatePolicy, InvocationCtx};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait and verdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Context handed to plan-level evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyContext {
    pub org_id: Uuid,
    pub environment: Option<Environment>,
    /// Highest risk tier among the plan's tools.
    pub max_risk_tier: Option<RiskTier>,
    pub autonomy_mode: AutonomyMode,
    pub tokens_used: u64,
}

/// `deny` entries are errors; `warn` entries are informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub deny: Vec<String>,
    pub warn: Vec<String>,
}

impl PolicyVerdict {
    pub fn is_denied(&self) -> bool {
        !self.deny.is_empty()
    }
}

#[async_trait::async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate_plan(
        &self,
        plan: &Plan,
        spec: &TaskSpec,
        ctx: &PolicyContext,
    ) -> Result<PolicyVerdict>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedded engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Built-in declarative rules. Deliberately small: org-specific policy
/// belongs in the remote engine; these are the non-negotiable floors.
pub struct EmbeddedPolicyEngine {
    task_token_budget: u64,
}

impl EmbeddedPolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            task_token_budget: config.task_token_budget,
        }
    }
}

#[async_trait::async_trait]
impl PolicyEngine for EmbeddedPolicyEngine {
    async fn evaluate_plan(
        &self,
        plan: &Plan,
        spec: &TaskSpec,
        ctx: &PolicyContext,
    ) -> Result<PolicyVerdict> {
        let mut verdict = PolicyVerdict::default();

        // Blast-radius constraint from the task spec binds every phase.
        if let Some(max_pct) = spec.constraints.max_blast_radius_pct {
            for phase in &plan.phases {
                if let rf_domain::plan::BatchRule::Percent { pct } = phase.batch {
                    if pct > max_pct {
                        verdict.deny.push(format!(
                            "phase {} touches {pct}% of the fleet, constraint allows {max_pct}%",
                            phase.name
                        ));
                    }
                }
            }
        }

        // Destructive tooling never auto-executes in plan-only mode.
        if ctx.autonomy_mode == AutonomyMode::PlanOnly
            && ctx.max_risk_tier.is_some_and(|t| t.is_mutating())
        {
            verdict.warn.push(
                "org is in plan-only mode; mutating tools will not execute".into(),
            );
        }

        // Destructive tools targeting production demand an empty-phase check.
        if ctx.max_risk_tier == Some(RiskTier::Destructive) && plan.phases.is_empty() {
            verdict
                .deny
                .push("destructive plan has no phased rollout".into());
        }

        if ctx.tokens_used > self.task_token_budget {
            verdict.deny.push(format!(
                "task exceeded its token budget ({} > {})",
                ctx.tokens_used, self.task_token_budget
            ));
        }

        // Excluded environments from the spec's own constraints.
        if let (Some(env), constraints) = (ctx.environment, &spec.constraints) {
            if constraints.excluded_environments.contains(&env) {
                verdict.deny.push(format!(
                    "target environment {env} is excluded by the task constraints"
                ));
            }
        }

        Ok(verdict)
    }
}

#[async_trait::async_trait]
impl GatePolicy for EmbeddedPolicyEngine {
    async fn check_invocation(
        &self,
        descriptor: &ToolDescriptor,
        ctx: &InvocationCtx,
    ) -> Result<()> {
        // Plan-only orgs may read but never mutate.
        if ctx.autonomy_mode == AutonomyMode::PlanOnly
            && descriptor.risk.is_mutating()
            && !ctx.dry_run
        {
            return Err(Error::PolicyDenied(format!(
                "{}: org autonomy is plan-only",
                descriptor.name
            )));
        }

        // Destructive tools: quality >= 90, explicit approval, completed
        // simulation. All three, no exceptions.
        if descriptor.risk == RiskTier::Destructive && !ctx.dry_run {
            if ctx.quality_total < 90 {
                return Err(Error::PolicyDenied(format!(
                    "{}: destructive tools require quality >= 90 (got {})",
                    descriptor.name, ctx.quality_total
                )));
            }
            if !ctx.approval_granted {
                return Err(Error::PolicyDenied(format!(
                    "{}: destructive tools require an explicit approval record",
                    descriptor.name
                )));
            }
            if !ctx.simulation_completed {
                return Err(Error::PolicyDenied(format!(
                    "{}: destructive tools require a completed simulation",
                    descriptor.name
                )));
            }
        }

        if ctx.tokens_used > self.task_token_budget {
            return Err(Error::PolicyDenied(format!(
                "{}: task token budget exhausted",
                descriptor.name
            )));
        }

        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Remote engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POSTs `{plan, spec, context}` to `{url}/evaluate` and expects a
/// `PolicyVerdict` back. Calls go through the shared breaker registry.
pub struct RemotePolicyEngine {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    breakers: Arc<BreakerRegistry>,
}

impl RemotePolicyEngine {
    pub fn new(config: &PolicyConfig, breakers: Arc<BreakerRegistry>) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| Error::Config("policy.url is required in remote mode".into()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token: std::env::var(&config.token_env).ok(),
            breakers,
        })
    }
}

#[async_trait::async_trait]
impl PolicyEngine for RemotePolicyEngine {
    async fn evaluate_plan(
        &self,
        plan: &Plan,
        spec: &TaskSpec,
        ctx: &PolicyContext,
    ) -> Result<PolicyVerdict> {
        let key = BreakerKey::new("policy", "evaluate", ctx.org_id);
        let body = serde_json::json!({ "plan": plan, "spec": spec, "context": ctx });
        self.breakers
            .call(&key, client_errors_are_soft, || async {
                let mut request = self.client.post(format!("{}/evaluate", self.url)).json(&body);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::Http(format!("policy engine returned {status}")));
                }
                response
                    .json::<PolicyVerdict>()
                    .await
                    .map_err(|e| Error::Http(format!("malformed policy verdict: {e}")))
            })
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rf_domain::plan::Phase;
    use rf_domain::task::{ActionType, Constraints, TargetSelector};

    fn engine() -> EmbeddedPolicyEngine {
        EmbeddedPolicyEngine::new(&PolicyConfig::default())
    }

    fn spec_with(constraints: Constraints) -> TaskSpec {
        TaskSpec {
            action: ActionType::PatchRollout,
            target: TargetSelector::default(),
            constraints,
            desired_outcome: "patch".into(),
        }
    }

    fn plan_for(spec: &TaskSpec, phases: Vec<Phase>) -> Plan {
        Plan::new(
            Uuid::new_v4(),
            spec,
            "patch_rollout_v1",
            "patch the fleet",
            phases,
            vec!["patch.apply".into()],
            serde_json::json!({}),
        )
    }

    fn ctx(mode: AutonomyMode) -> PolicyContext {
        PolicyContext {
            org_id: Uuid::new_v4(),
            environment: Some(Environment::Staging),
            max_risk_tier: Some(RiskTier::MutateMedium),
            autonomy_mode: mode,
            tokens_used: 0,
        }
    }

    #[tokio::test]
    async fn clean_plan_passes() {
        let spec = spec_with(Constraints::default());
        let plan = plan_for(&spec, vec![Phase::canary(5, 600, "standard")]);
        let verdict = engine()
            .evaluate_plan(&plan, &spec, &ctx(AutonomyMode::RiskBased))
            .await
            .unwrap();
        assert!(!verdict.is_denied());
        assert!(verdict.warn.is_empty());
    }

    #[tokio::test]
    async fn blast_radius_constraint_denies() {
        let spec = spec_with(Constraints {
            max_blast_radius_pct: Some(10),
            ..Constraints::default()
        });
        let plan = plan_for(&spec, vec![Phase::rollout("big-bang", 100, 0)]);
        let verdict = engine()
            .evaluate_plan(&plan, &spec, &ctx(AutonomyMode::RiskBased))
            .await
            .unwrap();
        assert!(verdict.is_denied());
        assert!(verdict.deny[0].contains("100%"));
    }

    #[tokio::test]
    async fn excluded_environment_denies() {
        let spec = spec_with(Constraints {
            excluded_environments: vec![Environment::Staging],
            ..Constraints::default()
        });
        let plan = plan_for(&spec, vec![Phase::canary(5, 600, "standard")]);
        let verdict = engine()
            .evaluate_plan(&plan, &spec, &ctx(AutonomyMode::RiskBased))
            .await
            .unwrap();
        assert!(verdict.is_denied());
    }

    #[tokio::test]
    async fn token_budget_exhaustion_denies() {
        let spec = spec_with(Constraints::default());
        let plan = plan_for(&spec, vec![Phase::canary(5, 600, "standard")]);
        let mut over = ctx(AutonomyMode::RiskBased);
        over.tokens_used = 1_000_000;
        let verdict = engine().evaluate_plan(&plan, &spec, &over).await.unwrap();
        assert!(verdict.is_denied());
    }

    #[tokio::test]
    async fn plan_only_mode_warns() {
        let spec = spec_with(Constraints::default());
        let plan = plan_for(&spec, vec![Phase::canary(5, 600, "standard")]);
        let verdict = engine()
            .evaluate_plan(&plan, &spec, &ctx(AutonomyMode::PlanOnly))
            .await
            .unwrap();
        assert!(!verdict.is_denied());
        assert_eq!(verdict.warn.len(), 1);
    }

    // ── Gate policy ─────────────────────────────────────────────────

    fn destructive_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "compute.terminate".into(),
            version: "1.0".into(),
            description: "terminate instances".into(),
            parameters: serde_json::json!({ "type": "object" }),
            result_schema: serde_json::json!({ "type": "object" }),
            risk: RiskTier::Destructive,
            scope: rf_domain::tool::ToolScope::Asset,
            idempotent: false,
            capabilities: vec![],
            cost_estimate: 1.0,
            timeout_secs: 60,
        }
    }

    fn invocation_ctx() -> InvocationCtx {
        InvocationCtx::internal(Uuid::new_v4(), Uuid::new_v4(), "dr")
    }

    #[tokio::test]
    async fn destructive_requires_all_three_conditions() {
        let engine = engine();
        let descriptor = destructive_descriptor();

        let mut ctx = invocation_ctx();
        ctx.autonomy_mode = AutonomyMode::RiskBased;
        ctx.quality_total = 95;
        ctx.approval_granted = true;
        ctx.simulation_completed = true;
        engine.check_invocation(&descriptor, &ctx).await.unwrap();

        for breaker in ["quality", "approval", "simulation"] {
            let mut broken = ctx.clone();
            match breaker {
                "quality" => broken.quality_total = 89,
                "approval" => broken.approval_granted = false,
                _ => broken.simulation_completed = false,
            }
            let err = engine.check_invocation(&descriptor, &broken).await.unwrap_err();
            assert!(matches!(err, Error::PolicyDenied(_)), "{breaker} should deny");
        }
    }

    #[tokio::test]
    async fn plan_only_denies_mutations_at_the_gate() {
        let engine = engine();
        let mut descriptor = destructive_descriptor();
        descriptor.risk = RiskTier::MutateLow;
        let ctx = invocation_ctx(); // internal() defaults to ApproveAll

        let mut plan_only = ctx.clone();
        plan_only.autonomy_mode = AutonomyMode::PlanOnly;
        let err = engine.check_invocation(&descriptor, &plan_only).await.unwrap_err();
        assert!(matches!(err, Error::PolicyDenied(_)));

        // Dry-run is allowed even in plan-only mode.
        plan_only.dry_run = true;
        engine.check_invocation(&descriptor, &plan_only).await.unwrap();
    }

    #[tokio::test]
    async fn read_tools_pass_the_gate_policy() {
        let engine = engine();
        let mut descriptor = destructive_descriptor();
        descriptor.risk = RiskTier::Read;
        let mut ctx = invocation_ctx();
        ctx.autonomy_mode = AutonomyMode::PlanOnly;
        engine.check_invocation(&descriptor, &ctx).await.unwrap();
    }
}
