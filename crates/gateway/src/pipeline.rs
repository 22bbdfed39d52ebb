//! The submission pipeline: intent → router → planner → validation →
//! risk → autonomy → workflow execution, with the task record mirroring
//! run state throughout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Timelike;
use parking_lot::RwLock;
use uuid::Uuid;

use rf_domain::autonomy::{AutonomyDecision, AutonomyMode};
use rf_domain::event::{Event, EventType};
use rf_domain::plan::{BatchRule, Phase, Plan};
use rf_domain::score::RiskScore;
use rf_domain::task::{Environment, Task, TaskStatus};
use rf_domain::tool::RiskTier;
use rf_domain::{Error, Result};
use rf_risk::{AutonomyInput, RiskContext};
use rf_tools::InvocationCtx;
use rf_validation::{PolicyContext, ValidationEvidence};
use rf_workflow::{RunRequest, RunState};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supporting stores
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Success history per artifact family, feeding the quality scorer and
/// the historical-failure risk factor.
#[derive(Default)]
pub struct HistoryStore {
    inner: RwLock<HashMap<String, (u64, u64)>>,
}

impl HistoryStore {
    pub fn record(&self, artifact_kind: &str, success: bool) {
        let mut inner = self.inner.write();
        let entry = inner.entry(artifact_kind.to_string()).or_insert((0, 0));
        entry.1 += 1;
        if success {
            entry.0 += 1;
        }
    }

    pub fn success_rate(&self, artifact_kind: &str) -> Option<f64> {
        let inner = self.inner.read();
        let (successes, total) = inner.get(artifact_kind)?;
        if *total == 0 {
            return None;
        }
        Some(*successes as f64 / *total as f64)
    }

    pub fn failure_rate(&self, artifact_kind: &str) -> f64 {
        self.success_rate(artifact_kind)
            .map(|rate| 1.0 - rate)
            .unwrap_or(0.0)
    }
}

/// Content-addressed plan cache: duplicate fingerprints within the TTL
/// share a cached plan, but only when the source TaskSpec is
/// byte-identical after normalization.
pub struct PlanCache {
    ttl: std::time::Duration,
    inner: RwLock<HashMap<String, CachedPlan>>,
}

struct CachedPlan {
    plan: Plan,
    spec_canonical: String,
    cached_at: std::time::Instant,
}

impl PlanCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, fingerprint: &str, spec_canonical: &str) -> Option<Plan> {
        let inner = self.inner.read();
        let cached = inner.get(fingerprint)?;
        if cached.cached_at.elapsed() >= self.ttl {
            return None;
        }
        if cached.spec_canonical != spec_canonical {
            return None;
        }
        Some(cached.plan.clone())
    }

    pub fn put(&self, plan: Plan, spec_canonical: String) {
        self.inner.write().insert(
            plan.fingerprint.clone(),
            CachedPlan {
                plan,
                spec_canonical,
                cached_at: std::time::Instant::now(),
            },
        );
    }

    /// Drop expired entries. Called periodically.
    pub fn prune(&self) {
        let ttl = self.ttl;
        self.inner.write().retain(|_, c| c.cached_at.elapsed() < ttl);
    }
}

/// Approval records per task, idempotent by `(task, actor)`.
#[derive(Default)]
pub struct ApprovalLedger {
    inner: RwLock<HashMap<Uuid, HashSet<String>>>,
}

impl ApprovalLedger {
    /// Record an approval. Returns false when this actor already
    /// approved this task.
    pub fn add(&self, task_id: Uuid, actor: &str) -> bool {
        self.inner
            .write()
            .entry(task_id)
            .or_default()
            .insert(actor.to_string())
    }

    pub fn count(&self, task_id: &Uuid) -> u32 {
        self.inner
            .read()
            .get(task_id)
            .map(|s| s.len() as u32)
            .unwrap_or(0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Submission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Accept a task and start processing it in the background. Returns the
/// created task record; quota and feature checks happen here, at the
/// edge.
pub fn submit(
    state: &AppState,
    org_id: Uuid,
    user: &str,
    intent: &str,
    environment: Option<Environment>,
    dry_run: bool,
    autonomy_override: Option<AutonomyMode>,
) -> Result<Task> {
    state.tenants.admit_task(org_id)?;

    let mut task = Task::new(org_id, user, intent);
    task.dry_run = dry_run;
    let task_id = state.tasks.insert(task.clone());

    let _ = state.events.send(Event::new(
        EventType::TaskCreated,
        org_id,
        serde_json::json!({ "task_id": task_id, "intent": intent }),
    ));

    let state = state.clone();
    tokio::spawn(async move {
        process(state, task_id, environment, autonomy_override).await;
    });

    Ok(task)
}

/// Drive one task through the whole pipeline. Every early exit lands
/// the task in a terminal state with a reason from the taxonomy.
async fn process(
    state: AppState,
    task_id: Uuid,
    env_hint: Option<Environment>,
    autonomy_override: Option<AutonomyMode>,
) {
    let Some(task) = state.tasks.get(&task_id) else {
        return;
    };
    let org_id = task.org_id;
    state
        .tasks
        .update(&task_id, |t| t.status = TaskStatus::Planning);

    // 1. Route the intent.
    let routed = match state.router.route(org_id, env_hint, &task.intent).await {
        Ok(routed) => routed,
        Err(e) => return fail_task(&state, task_id, &e),
    };
    if let Err(e) = state
        .tenants
        .record_tokens(org_id, u64::from(routed.tokens.total()))
    {
        return fail_task(&state, task_id, &e);
    }
    let spec = routed.spec.clone();
    let environment = spec.target.environment.or(env_hint);
    state.tasks.update(&task_id, |t| t.spec = Some(spec.clone()));

    let mut autonomy = state.config.autonomy_for(org_id).clone();
    if let Some(mode) = autonomy_override {
        autonomy.mode = mode;
    }

    // 2. Resolve the fleet through the inventory tool.
    let fleet = resolve_fleet(&state, org_id, task_id, &spec).await;

    // 3. Plan, reusing a fingerprint-identical cached plan when one
    // exists. The tool list is the agents' permitted union, known
    // before the LLM runs, so the fingerprint is computable up front.
    let mut tools_union = routed.primary.permitted_tools.clone();
    for agent in &routed.secondary {
        for tool in &agent.permitted_tools {
            if !tools_union.contains(tool) {
                tools_union.push(tool.clone());
            }
        }
    }
    let prospective_fp = rf_domain::plan::fingerprint(&spec, &tools_union);
    let spec_canonical = spec.canonical_json();

    let mut plan_tokens: u64 = 0;
    let mut plan = match state.plan_cache.get(&prospective_fp, &spec_canonical) {
        Some(cached) => {
            tracing::info!(%task_id, fingerprint = %prospective_fp, "reusing cached plan");
            let mut plan = cached;
            plan.id = Uuid::new_v4();
            plan.task_id = task_id;
            plan.created_at = chrono::Utc::now();
            plan
        }
        None => {
            let planned = match state
                .planner
                .plan(
                    task_id,
                    org_id,
                    &spec,
                    &routed.primary,
                    &routed.secondary,
                    &format!("fleet: {} assets", fleet.len()),
                )
                .await
            {
                Ok(planned) => planned,
                Err(e) => return fail_task(&state, task_id, &e),
            };
            plan_tokens = u64::from(planned.tokens.total());
            if let Err(e) = state.tenants.record_tokens(org_id, plan_tokens) {
                return fail_task(&state, task_id, &e);
            }
            state
                .plan_cache
                .put(planned.plan.clone(), spec_canonical.clone());
            planned.plan
        }
    };

    // 4. Risk assessment (before phase defaulting: the batch
    // recommendation depends on the level).
    let max_risk_tier = max_tool_tier(&state, &plan.tools);
    let risk = assess_risk(&state, &spec, environment, &fleet, &plan, max_risk_tier, &autonomy);
    if plan.phases.is_empty() {
        plan.phases = default_phases(risk);
        plan.warnings
            .push("no phases in plan artifact; applied risk-recommended shape".into());
    }

    // 5. Validation pipeline.
    let has_destructive = max_risk_tier == Some(RiskTier::Destructive);
    let policy_ctx = PolicyContext {
        org_id,
        environment,
        max_risk_tier,
        autonomy_mode: autonomy.mode,
        tokens_used: u64::from(routed.tokens.total()) + plan_tokens,
    };
    let evidence = ValidationEvidence {
        simulation_completed: false,
        simulation_pass_rate: None,
        historical_success_rate: state.history.success_rate(&plan.artifact_kind),
        approvals: state.approvals.count(&task_id),
        has_destructive_tools: has_destructive,
    };
    let outcome = match state
        .validation
        .validate(&plan, &spec, &policy_ctx, &evidence)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return fail_task(&state, task_id, &e),
    };

    let quality = outcome.quality;
    state.plans.write().insert(plan.id, plan.clone());
    persist_plan(&state, &plan);
    state.tasks.update(&task_id, |t| {
        t.plan_id = Some(plan.id);
        t.quality = Some(quality);
        t.risk = Some(risk);
    });
    let _ = state.events.send(Event::new(
        EventType::PlanValidated,
        org_id,
        serde_json::json!({
            "task_id": task_id,
            "plan_id": plan.id,
            "fingerprint": plan.fingerprint,
            "quality_total": quality.total(),
            "errors": outcome.errors.len(),
            "warnings": outcome.warnings.len(),
        }),
    ));

    if !outcome.is_valid() {
        let error = if !outcome.dangerous_patterns.is_empty() {
            Error::DangerousPattern(outcome.dangerous_patterns.join(", "))
        } else if outcome.policy.is_denied() {
            Error::PolicyDenied(outcome.policy.deny.join("; "))
        } else {
            Error::SchemaInvalid(outcome.errors.join("; "))
        };
        return fail_task(&state, task_id, &error);
    }

    // 6. Autonomy decision.
    let target_envs: Vec<Environment> = environment.into_iter().collect();
    let decision = rf_risk::decide(&AutonomyInput {
        config: &autonomy,
        risk: risk.level,
        quality: &quality,
        plan_has_canary: plan.has_canary_phase(),
        target_envs: &target_envs,
        current_phase_is_canary: plan.phases.first().map(|p| p.canary).unwrap_or(false),
        now: chrono::Utc::now(),
    });
    state.tasks.update(&task_id, |t| t.autonomy = Some(decision));

    let needs_approval = match decision {
        AutonomyDecision::AutoApprove => quality.requires_approval,
        AutonomyDecision::RequireApproval => true,
        AutonomyDecision::Block => {
            // Human review can add up to 20 points; a score that review
            // could lift over the bar waits for a human instead of
            // dying.
            let reviewable = quality.total() - quality.human_review + 20;
            let threshold = target_envs
                .iter()
                .map(|e| e.quality_threshold())
                .max()
                .unwrap_or(0);
            if reviewable >= threshold {
                true
            } else {
                return fail_task(
                    &state,
                    task_id,
                    &Error::QualityInsufficient {
                        total: quality.total(),
                        required: threshold,
                    },
                );
            }
        }
    };

    // 7. Execute as a workflow run.
    let run_id = Uuid::new_v4();
    state.tasks.update(&task_id, |t| t.run_id = Some(run_id));

    let request = RunRequest {
        task_id,
        org_id,
        plan: plan.clone(),
        fleet,
        apply_tool: apply_tool_for(&state, &plan.tools),
        agent: routed.primary.id.clone(),
        autonomy_mode: autonomy.mode,
        quality_total: quality.total(),
        needs_approval,
        needs_simulation: has_destructive,
        dry_run: task.dry_run || autonomy.mode == AutonomyMode::PlanOnly,
        inconclusive_policy: state.config.canary.on_inconclusive,
    };

    // Mirror run state onto the task while the engine drives it.
    let mirror = {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                let Some(run) = state.engine.run_snapshot(&run_id) else {
                    continue;
                };
                let status = task_status_for(run.state);
                state.tasks.update(&task_id, |t| {
                    if !t.status.is_terminal() && t.status != status {
                        t.status = status;
                    }
                });
                if run.state.is_terminal() {
                    break;
                }
            }
        })
    };

    let run = state.engine.execute(run_id, request).await;
    mirror.abort();

    state
        .history
        .record(&plan.artifact_kind, run.state == RunState::Succeeded);

    let (status, code) = match run.state {
        RunState::Succeeded => (TaskStatus::Succeeded, "succeeded"),
        RunState::RolledBack => (TaskStatus::RolledBack, "rolled_back"),
        RunState::Cancelled => (TaskStatus::Cancelled, "cancelled"),
        RunState::Rejected => (TaskStatus::Failed, "rejected"),
        _ => (TaskStatus::Failed, "failed"),
    };
    let narrative = run
        .reason
        .clone()
        .unwrap_or_else(|| format!("run finished {}", run.state));
    state.tasks.update(&task_id, |t| t.finish(status, code, narrative));
    state.tasks.cleanup_channel(&task_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append the validated plan (fingerprint included) to the plans log.
fn persist_plan(state: &AppState, plan: &Plan) {
    let dir = state.config.state_path.join("plans");
    let _ = std::fs::create_dir_all(&dir);
    if let Ok(json) = serde_json::to_string(plan) {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("plans.jsonl"))
        {
            use std::io::Write;
            let _ = writeln!(file, "{json}");
        }
    }
}

fn fail_task(state: &AppState, task_id: Uuid, error: &Error) {
    let status = match error {
        Error::RequiresApproval(_) => TaskStatus::AwaitingApproval,
        _ => TaskStatus::Failed,
    };
    tracing::info!(%task_id, code = error.reason_code(), "task did not reach execution");
    state.tasks.update(&task_id, |t| {
        t.finish(status, error.reason_code(), error.to_string());
    });
    if let Some(task) = state.tasks.get(&task_id) {
        let _ = state.events.send(Event::new(
            EventType::TaskFailed,
            task.org_id,
            serde_json::json!({
                "task_id": task_id,
                "reason": error.reason_code(),
            }),
        ));
    }
    state.tasks.cleanup_channel(&task_id);
}

async fn resolve_fleet(
    state: &AppState,
    org_id: Uuid,
    task_id: Uuid,
    spec: &rf_domain::task::TaskSpec,
) -> Vec<String> {
    let mut ctx = InvocationCtx::internal(org_id, Uuid::nil(), "engine");
    ctx.task_id = task_id;
    let params = serde_json::json!({
        "platform": spec.target.platform,
        "environment": spec.target.environment.map(|e| e.to_string()),
        "tags": spec.target.tags,
        "name_glob": spec.target.name_glob,
    });
    match state.gate.invoke("inventory.list", params, &ctx, None).await {
        Ok(result) => result
            .get("assets")
            .and_then(|v| v.as_array())
            .map(|assets| {
                assets
                    .iter()
                    .filter_map(|a| a.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            tracing::warn!(%task_id, error = %e, "inventory resolution failed, empty fleet");
            Vec::new()
        }
    }
}

fn max_tool_tier(state: &AppState, tools: &[String]) -> Option<RiskTier> {
    tools
        .iter()
        .filter_map(|name| state.tools.get(name).map(|t| t.descriptor.risk))
        .max()
}

/// The mutating tool the executor applies per asset: the first tool in
/// the plan whose descriptor mutates.
fn apply_tool_for(state: &AppState, tools: &[String]) -> String {
    tools
        .iter()
        .find(|name| {
            state
                .tools
                .get(name)
                .is_some_and(|t| t.descriptor.risk.is_mutating())
        })
        .cloned()
        .unwrap_or_else(|| "config.apply".into())
}

fn assess_risk(
    state: &AppState,
    spec: &rf_domain::task::TaskSpec,
    environment: Option<Environment>,
    fleet: &[String],
    plan: &Plan,
    max_risk_tier: Option<RiskTier>,
    autonomy: &rf_domain::autonomy::AutonomyConfig,
) -> RiskScore {
    let environment = environment.unwrap_or(Environment::Dev);
    let widest = plan
        .phases
        .iter()
        .map(|p| match &p.batch {
            BatchRule::Percent { pct } => {
                (fleet.len() as f64 * f64::from(*pct) / 100.0).ceil() as usize
            }
            BatchRule::Assets { assets } => assets.len(),
            BatchRule::Count { count } => *count,
        })
        .max()
        .unwrap_or(fleet.len());

    let hour = match autonomy.timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => chrono::Utc::now().with_timezone(&tz).hour() as u8,
        Err(_) => chrono::Utc::now().hour() as u8,
    };

    rf_risk::assess(&RiskContext {
        action: spec.action,
        environment,
        asset_count: widest.min(fleet.len()),
        fleet_size: fleet.len(),
        hour,
        historical_failure_rate: state.history.failure_rate(&plan.artifact_kind),
        max_risk_tier: max_risk_tier.unwrap_or(RiskTier::MutateMedium),
        dependency_count: spec.target.tags.len(),
        compliance_scoped: spec
            .target
            .tags
            .keys()
            .any(|k| matches!(k.as_str(), "compliance" | "pci" | "hipaa")),
    })
}

/// Default phase shape per the risk recommendation: a canary batch plus
/// a full rollout.
fn default_phases(risk: RiskScore) -> Vec<Phase> {
    let (batch, wait_minutes) = rf_risk::recommend_batch(risk.level);
    let canary = Phase {
        name: "canary".into(),
        batch,
        wait_secs: wait_minutes * 60,
        timeout_secs: 3_600,
        canary: true,
        rollback_threshold: 0.2,
        max_parallel: 4,
        metric_template: Some("standard".into()),
        preconditions: Vec::new(),
        strict_non_empty: true,
    };
    vec![canary, Phase::rollout("rollout", 100, 300)]
}

fn task_status_for(state: RunState) -> TaskStatus {
    match state {
        RunState::Created | RunState::Planning | RunState::Validating => TaskStatus::Planning,
        RunState::AwaitingApproval => TaskStatus::AwaitingApproval,
        RunState::Paused => TaskStatus::Paused,
        RunState::Simulating
        | RunState::Executing
        | RunState::AnalyzingCanary
        | RunState::Promoting
        | RunState::RollingBack => TaskStatus::Executing,
        RunState::Succeeded => TaskStatus::Succeeded,
        RunState::RolledBack => TaskStatus::RolledBack,
        RunState::Failed | RunState::Rejected => TaskStatus::Failed,
        RunState::Cancelled => TaskStatus::Cancelled,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
