//! The durable phased executor.
//!
//! A run's every decision is checkpointed before its effects dispatch;
//! signals arrive id-keyed and ordered; dwell and analysis windows read
//! time through the workflow clock. One engine task advances a given run
//! at a time, and per-org admission keeps excess runs pending until
//! capacity frees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

use rf_breaker::retry::RetryPolicy;
use rf_canary::{builtin, CanaryAnalyzer, Verdict};
use rf_domain::autonomy::AutonomyMode;
use rf_domain::config::{InconclusivePolicy, WorkflowConfig};
use rf_domain::event::{Event, EventType};
use rf_domain::plan::{BatchRule, Phase, Plan};
use rf_domain::tool::InverseOp;
use rf_domain::{Error, Result};
use rf_tools::{InvocationCtx, InvocationGate, RollbackSink};

use crate::checkpoint::CheckpointStore;
use crate::clock::WorkflowClock;
use crate::event::{Run, RunEvent};
use crate::heartbeat::HeartbeatTracker;
use crate::signal::{Signal, SignalKind, SignalQueue};
use crate::state::RunState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the engine needs to drive one approved plan.
#[derive(Clone)]
pub struct RunRequest {
    pub task_id: Uuid,
    pub org_id: Uuid,
    pub plan: Plan,
    /// Assets matching the target selector, in selection order.
    pub fleet: Vec<String>,
    /// The mutating tool invoked per asset in each phase.
    pub apply_tool: String,
    /// Agent the invocations are attributed to.
    pub agent: String,
    pub autonomy_mode: AutonomyMode,
    pub quality_total: u8,
    /// Run the whole workflow through AwaitingApproval first.
    pub needs_approval: bool,
    /// Run a dry-run simulation pass before executing.
    pub needs_simulation: bool,
    /// The entire run is a dry run (plan-only orgs, user-requested).
    pub dry_run: bool,
    pub inconclusive_policy: InconclusivePolicy,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rollback sink wired to the checkpoint log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable rollback stack: every push is checkpointed before it is
/// visible, and mirrored into the engine's live run snapshot.
struct DurableStack {
    run_id: Uuid,
    checkpoints: Arc<CheckpointStore>,
    runs: Arc<RwLock<HashMap<Uuid, Run>>>,
    ops: Mutex<Vec<InverseOp>>,
}

impl DurableStack {
    fn new(
        run_id: Uuid,
        checkpoints: Arc<CheckpointStore>,
        runs: Arc<RwLock<HashMap<Uuid, Run>>>,
        existing: Vec<InverseOp>,
    ) -> Self {
        Self {
            run_id,
            checkpoints,
            runs,
            ops: Mutex::new(existing),
        }
    }

    fn pop(&self) -> Option<InverseOp> {
        self.ops.lock().pop()
    }

    fn len(&self) -> usize {
        self.ops.lock().len()
    }
}

impl RollbackSink for DurableStack {
    fn push(&self, op: InverseOp) {
        let event = RunEvent::InversePushed { op: op.clone() };
        if let Err(e) = self.checkpoints.append(&self.run_id, event.clone()) {
            tracing::error!(run_id = %self.run_id, error = %e, "failed to checkpoint inverse op");
        }
        if let Some(run) = self.runs.write().get_mut(&self.run_id) {
            run.apply(&event);
        }
        self.ops.lock().push(op);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkflowEngine {
    gate: Arc<InvocationGate>,
    analyzer: Arc<CanaryAnalyzer>,
    checkpoints: Arc<CheckpointStore>,
    signals: Arc<SignalQueue>,
    heartbeats: Arc<HeartbeatTracker>,
    clock: Arc<dyn WorkflowClock>,
    config: WorkflowConfig,
    events: broadcast::Sender<Event>,
    retry: RetryPolicy,
    /// Live snapshots, one per run this engine has seen.
    runs: Arc<RwLock<HashMap<Uuid, Run>>>,
    /// Worker pool bound: runs actively advancing at any moment.
    worker_slots: Arc<Semaphore>,
    /// Per-org admission: runs above the bound stay pending.
    org_slots: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl WorkflowEngine {
    pub fn new(
        gate: Arc<InvocationGate>,
        analyzer: Arc<CanaryAnalyzer>,
        checkpoints: Arc<CheckpointStore>,
        clock: Arc<dyn WorkflowClock>,
        config: WorkflowConfig,
    ) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.activity_retries.max(1),
            base_delay: Duration::from_millis(config.activity_backoff_ms),
            ..RetryPolicy::default()
        };
        let (events, _) = broadcast::channel(256);
        let worker_slots = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            gate,
            analyzer,
            checkpoints,
            signals: Arc::new(SignalQueue::new()),
            heartbeats: Arc::new(HeartbeatTracker::new()),
            clock,
            config,
            events,
            retry,
            runs: Arc::new(RwLock::new(HashMap::new())),
            worker_slots,
            org_slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// The shared lifecycle event bus; the submission pipeline publishes
    /// its own events (task.created, plan.validated) through it.
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    pub fn signals(&self) -> &Arc<SignalQueue> {
        &self.signals
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatTracker> {
        &self.heartbeats
    }

    pub fn run_snapshot(&self, run_id: &Uuid) -> Option<Run> {
        self.runs.read().get(run_id).cloned()
    }

    /// Deliver a signal to a run. Returns `false` on duplicate id.
    pub fn signal(&self, run_id: Uuid, signal: Signal) -> bool {
        let accepted = self.signals.accept(run_id, signal.clone());
        if accepted {
            let _ = self.checkpoints.append(
                &run_id,
                RunEvent::SignalApplied {
                    signal_id: signal.id,
                    kind: signal.kind.name().to_string(),
                },
            );
        }
        accepted
    }

    /// Execute a run to a terminal state under a caller-supplied run id
    /// (so signals can target the run before it finishes). Blocks on
    /// per-org admission when the org is at its active-run bound.
    pub async fn execute(&self, run_id: Uuid, request: RunRequest) -> Run {
        self.bootstrap_run(run_id, &request);

        let slot = self.org_slot(request.org_id);
        let _org_permit = slot.acquire().await;
        let _worker_permit = self.worker_slots.acquire().await;

        let result = self.drive(run_id, &request, Vec::new()).await;
        self.finish_run(run_id, &request, result).await
    }

    /// Resume a checkpointed run on this worker: replay the log, then
    /// continue from the derived state.
    pub async fn resume(&self, run_id: Uuid, request: RunRequest) -> Result<Run> {
        let replayed = self.checkpoints.replay(&run_id)?;
        if replayed.state.is_terminal() {
            self.runs.write().insert(run_id, replayed.clone());
            return Ok(replayed);
        }
        tracing::info!(%run_id, state = %replayed.state, cursor = replayed.phase_cursor, "resuming run");
        let stack = replayed.rollback_stack.clone();
        self.runs.write().insert(run_id, replayed);

        let slot = self.org_slot(request.org_id);
        let _org_permit = slot.acquire().await;
        let _worker_permit = self.worker_slots.acquire().await;

        let result = self.drive(run_id, &request, stack).await;
        Ok(self.finish_run(run_id, &request, result).await)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn org_slot(&self, org_id: Uuid) -> Arc<Semaphore> {
        let mut slots = self.org_slots.lock();
        slots
            .entry(org_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_active_runs_per_org)))
            .clone()
    }

    fn bootstrap_run(&self, run_id: Uuid, request: &RunRequest) {
        let event = RunEvent::Created {
            run_id,
            task_id: request.task_id,
            org_id: request.org_id,
            plan_id: request.plan.id,
        };
        let _ = self.checkpoints.append(&run_id, event.clone());
        let mut run = Run::replay([&event]);
        run.state = RunState::Created;
        self.runs.write().insert(run_id, run);
    }

    fn transition(&self, run_id: Uuid, to: RunState, reason: Option<String>) -> Result<()> {
        let current = self
            .runs
            .read()
            .get(&run_id)
            .map(|r| r.state)
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        if !current.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: to.to_string(),
            });
        }
        // Checkpoint before the snapshot mutates; lock order is always
        // checkpoint, then runs.
        let event = RunEvent::Transitioned { to, reason };
        self.checkpoints.append(&run_id, event.clone())?;
        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.apply(&event);
        }
        tracing::debug!(%run_id, state = %to, "run transitioned");
        Ok(())
    }

    fn record(&self, run_id: Uuid, event: RunEvent) {
        if let Err(e) = self.checkpoints.append(&run_id, event.clone()) {
            tracing::error!(%run_id, error = %e, "checkpoint append failed");
        }
        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.apply(&event);
        }
    }

    fn emit(&self, request: &RunRequest, event_type: EventType, data: serde_json::Value) {
        let _ = self
            .events
            .send(Event::new(event_type, request.org_id, data));
    }

    fn state_of(&self, run_id: &Uuid) -> RunState {
        self.runs
            .read()
            .get(run_id)
            .map(|r| r.state)
            .unwrap_or(RunState::Failed)
    }

    /// Outcome of the drive loop, mapped to a terminal state afterwards.
    async fn drive(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        resumed_stack: Vec<InverseOp>,
    ) -> DriveOutcome {
        let stack = Arc::new(DurableStack::new(
            run_id,
            self.checkpoints.clone(),
            self.runs.clone(),
            resumed_stack,
        ));

        // Walk the pre-execution states the machine requires. A resumed
        // run may already be past them.
        if self.state_of(&run_id) == RunState::Created {
            if self.transition(run_id, RunState::Planning, None).is_err()
                || self.transition(run_id, RunState::Validating, None).is_err()
            {
                return DriveOutcome::Fail("pre-execution transition refused".into());
            }
        }

        if request.plan.phases.is_empty() {
            return DriveOutcome::Fail("plan has no phases".into());
        }

        let mut simulation_completed = false;
        // A run resumed past its approval gate was necessarily approved.
        let initial = self.state_of(&run_id);
        let mut approval_granted = !request.needs_approval
            || !matches!(
                initial,
                RunState::Created
                    | RunState::Planning
                    | RunState::Validating
                    | RunState::AwaitingApproval
            );

        // Approval gate. A resumed run parked in AwaitingApproval waits
        // here again.
        if request.needs_approval && self.state_of(&run_id) == RunState::Validating {
            if self
                .transition(run_id, RunState::AwaitingApproval, None)
                .is_err()
            {
                return DriveOutcome::Fail("approval transition refused".into());
            }
            self.emit(
                request,
                EventType::ApprovalRequested,
                serde_json::json!({ "task_id": request.task_id, "run_id": run_id }),
            );
        }
        if self.state_of(&run_id) == RunState::AwaitingApproval {
            match self.await_approval(run_id).await {
                ApprovalOutcome::Approved => approval_granted = true,
                ApprovalOutcome::Rejected(reason) => return DriveOutcome::Reject(reason),
                ApprovalOutcome::Cancelled => return DriveOutcome::Cancel(stack),
                ApprovalOutcome::ForceRollback => {
                    return DriveOutcome::Rollback(stack, "forced".into())
                }
            }
        }

        // Simulation pass.
        if request.needs_simulation {
            let from = self.state_of(&run_id);
            let ok = match from {
                RunState::Validating | RunState::AwaitingApproval => {
                    self.transition(run_id, RunState::Simulating, None).is_ok()
                }
                RunState::Simulating => true,
                _ => false,
            };
            if !ok {
                return DriveOutcome::Fail("simulation transition refused".into());
            }
            if let Err(e) = self
                .simulate(run_id, request, approval_granted)
                .await
            {
                return DriveOutcome::Fail(format!("simulation failed: {e}"));
            }
            simulation_completed = true;
        }

        // Enter Executing.
        let from = self.state_of(&run_id);
        let entered = match from {
            RunState::Validating | RunState::AwaitingApproval | RunState::Simulating => {
                self.transition(run_id, RunState::Executing, None).is_ok()
            }
            RunState::Executing | RunState::Promoting | RunState::AnalyzingCanary => true,
            other => {
                return DriveOutcome::Fail(format!("cannot execute from state {other}"));
            }
        };
        if !entered {
            return DriveOutcome::Fail("execution transition refused".into());
        }

        // Phase loop.
        let start_cursor = self.run_snapshot(&run_id).map(|r| r.phase_cursor).unwrap_or(0);
        let mut touched: Vec<String> = self
            .run_snapshot(&run_id)
            .map(|r| r.cohorts.iter().flatten().cloned().collect())
            .unwrap_or_default();

        for (index, phase) in request.plan.phases.iter().enumerate().skip(start_cursor) {
            // Suspension point: drain signals before the phase begins.
            match self.drain_signals(run_id, request).await {
                SignalOutcome::Continue => {}
                SignalOutcome::Cancel => return DriveOutcome::Cancel(stack),
                SignalOutcome::ForceRollback => return DriveOutcome::Rollback(stack, "forced".into()),
            }

            let cohort = select_cohort(&phase.batch, &request.fleet, &touched);
            if cohort.is_empty() && phase.strict_non_empty {
                let message = format!("phase {} selected an empty cohort", phase.name);
                return if stack.len() > 0 {
                    DriveOutcome::Rollback(stack, message)
                } else {
                    DriveOutcome::Fail(message)
                };
            }
            touched.extend(cohort.iter().cloned());

            self.record(
                run_id,
                RunEvent::PhaseStarted {
                    index,
                    name: phase.name.clone(),
                    cohort: cohort.clone(),
                },
            );
            self.emit(
                request,
                EventType::PhaseStarted,
                serde_json::json!({
                    "run_id": run_id,
                    "phase": phase.name,
                    "index": index,
                    "cohort_size": cohort.len(),
                }),
            );

            let phase_started = self.clock.now();
            let failure_rate = self
                .execute_cohort(
                    run_id,
                    request,
                    index,
                    phase,
                    &cohort,
                    &stack,
                    approval_granted,
                    simulation_completed,
                )
                .await;
            self.record(run_id, RunEvent::PhaseCompleted { index, failure_rate });

            if failure_rate > phase.rollback_threshold {
                return DriveOutcome::Rollback(
                    stack,
                    format!(
                        "phase {} failure rate {:.2} exceeded threshold {:.2}",
                        phase.name, failure_rate, phase.rollback_threshold
                    ),
                );
            }

            let elapsed = (self.clock.now() - phase_started)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed > Duration::from_secs(phase.timeout_secs) {
                return DriveOutcome::Rollback(
                    stack,
                    format!("phase {} exceeded its {}s timeout", phase.name, phase.timeout_secs),
                );
            }

            // Dwell: metric evaluation happens no earlier than
            // cohort-complete + wait.
            self.clock.sleep(Duration::from_secs(phase.wait_secs)).await;

            // Suspension point: dwell may have accumulated signals.
            match self.drain_signals(run_id, request).await {
                SignalOutcome::Continue => {}
                SignalOutcome::Cancel => return DriveOutcome::Cancel(stack),
                SignalOutcome::ForceRollback => return DriveOutcome::Rollback(stack, "forced".into()),
            }

            // Canary analysis.
            if let Some(template_name) = &phase.metric_template {
                match self
                    .analyze_phase(run_id, request, index, phase, template_name, &cohort, &touched, phase_started)
                    .await
                {
                    AnalysisOutcome::Promote => {}
                    AnalysisOutcome::Rollback(reason) => {
                        return DriveOutcome::Rollback(stack, reason)
                    }
                    AnalysisOutcome::Cancelled => return DriveOutcome::Cancel(stack),
                    AnalysisOutcome::Rejected(reason) => return DriveOutcome::Reject(reason),
                }
            }

            // Promote to the next phase (or fall through to Succeeded).
            let last = index + 1 == request.plan.phases.len();
            if self.transition(run_id, RunState::Promoting, None).is_err() {
                return DriveOutcome::Fail("promotion transition refused".into());
            }
            if !last && self.transition(run_id, RunState::Executing, None).is_err() {
                return DriveOutcome::Fail("re-entry transition refused".into());
            }
        }

        DriveOutcome::Succeed
    }

    /// Map a drive outcome onto the terminal machinery, performing the
    /// rollback drain where needed.
    async fn finish_run(&self, run_id: Uuid, request: &RunRequest, outcome: DriveOutcome) -> Run {
        match outcome {
            DriveOutcome::Succeed => {
                let _ = self.transition(run_id, RunState::Succeeded, None);
                self.emit(
                    request,
                    EventType::TaskSucceeded,
                    serde_json::json!({ "task_id": request.task_id, "run_id": run_id }),
                );
            }
            DriveOutcome::Fail(reason) => {
                let _ = self.transition(run_id, RunState::Failed, Some(reason.clone()));
                self.emit(
                    request,
                    EventType::TaskFailed,
                    serde_json::json!({ "task_id": request.task_id, "run_id": run_id, "reason": reason }),
                );
            }
            DriveOutcome::Reject(reason) => {
                let _ = self.transition(run_id, RunState::Rejected, Some(reason));
            }
            DriveOutcome::Cancel(stack) => {
                if self.config.cancel_fast || stack.len() == 0 {
                    let _ = self.transition(run_id, RunState::Cancelled, Some("cancelled".into()));
                } else {
                    self.rollback(run_id, request, &stack, "cancelled".into()).await;
                }
            }
            DriveOutcome::Rollback(stack, reason) => {
                self.rollback(run_id, request, &stack, reason).await;
            }
        }

        self.signals.clear(&run_id);
        self.heartbeats.remove(&run_id);
        self.gate.clear_run(&run_id);
        self.run_snapshot(&run_id)
            .unwrap_or_else(|| Run::replay(std::iter::empty::<&RunEvent>()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_cohort(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        index: usize,
        phase: &Phase,
        cohort: &[String],
        stack: &Arc<DurableStack>,
        approval_granted: bool,
        simulation_completed: bool,
    ) -> f64 {
        if cohort.is_empty() {
            return 0.0;
        }

        let parallelism = Arc::new(Semaphore::new(phase.max_parallel.max(1)));
        let mut handles = Vec::with_capacity(cohort.len());

        for asset in cohort {
            let permit = parallelism.clone();
            let asset = asset.clone();
            let ctx = InvocationCtx {
                org_id: request.org_id,
                task_id: request.task_id,
                run_id,
                phase: phase.name.clone(),
                agent: request.agent.clone(),
                autonomy_mode: request.autonomy_mode,
                approval_granted,
                simulation_completed,
                quality_total: request.quality_total,
                tokens_used: 0,
                dry_run: request.dry_run,
            };
            let gate = self.gate.clone();
            let retry = self.retry;
            let tool = request.apply_tool.clone();
            let stack = stack.clone();

            // Bounded parallelism within the cohort; each asset is one
            // retried activity whose successful mutation lands on the
            // durable rollback stack.
            handles.push(async move {
                let _permit = permit.acquire().await;
                let params = serde_json::json!({ "asset": asset });
                let result = retry
                    .run(&tool, || {
                        let gate = gate.clone();
                        let params = params.clone();
                        let ctx = ctx.clone();
                        let tool = tool.clone();
                        let stack = stack.clone();
                        async move {
                            gate.invoke(
                                &tool,
                                params,
                                &ctx,
                                Some(stack.as_ref() as &dyn RollbackSink),
                            )
                            .await
                        }
                    })
                    .await;
                (asset, result.is_ok())
            });
        }

        let results = futures_util::future::join_all(handles).await;

        let mut failures = 0usize;
        for (i, (asset, ok)) in results.iter().enumerate() {
            self.heartbeats.beat(run_id, (i + 1) as u64);
            self.record(
                run_id,
                RunEvent::AssetCompleted {
                    phase: index,
                    asset: asset.clone(),
                    ok: *ok,
                },
            );
            if !ok {
                failures += 1;
            }
        }

        failures as f64 / cohort.len() as f64
    }

    async fn simulate(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        approval_granted: bool,
    ) -> Result<()> {
        let mut touched: Vec<String> = Vec::new();
        for phase in &request.plan.phases {
            let cohort = select_cohort(&phase.batch, &request.fleet, &touched);
            touched.extend(cohort.iter().cloned());
            for asset in &cohort {
                let ctx = InvocationCtx {
                    org_id: request.org_id,
                    task_id: request.task_id,
                    run_id,
                    phase: phase.name.clone(),
                    agent: request.agent.clone(),
                    autonomy_mode: request.autonomy_mode,
                    approval_granted,
                    simulation_completed: false,
                    quality_total: request.quality_total,
                    tokens_used: 0,
                    dry_run: true,
                };
                let params = serde_json::json!({ "asset": asset });
                self.gate
                    .invoke(&request.apply_tool, params, &ctx, None)
                    .await?;
            }
        }
        tracing::info!(%run_id, "simulation pass complete");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn analyze_phase(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        index: usize,
        phase: &Phase,
        template_name: &str,
        cohort: &[String],
        touched: &[String],
        window_start: chrono::DateTime<chrono::Utc>,
    ) -> AnalysisOutcome {
        if self
            .transition(run_id, RunState::AnalyzingCanary, None)
            .is_err()
        {
            return AnalysisOutcome::Rollback("analysis transition refused".into());
        }

        let Some(template) = builtin(template_name) else {
            // Unknown template: treat as inconclusive rather than guess.
            self.record(
                run_id,
                RunEvent::CanaryVerdict { index, verdict: "inconclusive".into() },
            );
            return self.handle_inconclusive(run_id, request).await;
        };

        let baseline: Vec<String> = request
            .fleet
            .iter()
            .filter(|a| !touched.contains(a))
            .cloned()
            .collect();
        // With nothing left untouched, compare against pre-phase assets.
        let baseline = if baseline.is_empty() {
            request
                .fleet
                .iter()
                .filter(|a| !cohort.contains(a))
                .cloned()
                .collect()
        } else {
            baseline
        };

        let mut report = self
            .analyzer
            .analyze(&template, cohort, &baseline, window_start, self.clock.now())
            .await;

        // Optional secondary dwell for inconclusive verdicts.
        if report.verdict == Verdict::Inconclusive
            && request.inconclusive_policy == InconclusivePolicy::RepeatOnce
        {
            self.clock
                .sleep(Duration::from_secs(phase.wait_secs))
                .await;
            report = self
                .analyzer
                .analyze(&template, cohort, &baseline, window_start, self.clock.now())
                .await;
        }

        let verdict_str = match report.verdict {
            Verdict::Passing => "passing",
            Verdict::Failing => "failing",
            Verdict::Inconclusive => "inconclusive",
        };
        self.record(
            run_id,
            RunEvent::CanaryVerdict { index, verdict: verdict_str.into() },
        );
        self.emit(
            request,
            EventType::CanaryVerdict,
            serde_json::json!({
                "run_id": run_id,
                "phase": phase.name,
                "verdict": verdict_str,
                "breached": report.breached_metrics(),
            }),
        );

        match report.verdict {
            Verdict::Passing => AnalysisOutcome::Promote,
            Verdict::Failing => AnalysisOutcome::Rollback(format!(
                "canary failing: {}",
                report.breached_metrics().join(", ")
            )),
            Verdict::Inconclusive => self.handle_inconclusive(run_id, request).await,
        }
    }

    /// Inconclusive verdicts hold for a human signal.
    async fn handle_inconclusive(&self, run_id: Uuid, request: &RunRequest) -> AnalysisOutcome {
        if self
            .transition(run_id, RunState::AwaitingApproval, Some("canary inconclusive".into()))
            .is_err()
        {
            return AnalysisOutcome::Rollback("inconclusive-hold transition refused".into());
        }
        self.emit(
            request,
            EventType::ApprovalRequested,
            serde_json::json!({
                "run_id": run_id,
                "reason": "canary_inconclusive",
            }),
        );

        loop {
            let signal = self.signals.next(run_id).await;
            match signal.kind {
                SignalKind::ForcePromote | SignalKind::Approve { .. } => {
                    // Promoting is reached through the normal path; just
                    // step back into Executing via Promoting.
                    let _ = self.transition(run_id, RunState::Promoting, None);
                    let _ = self.transition(run_id, RunState::Executing, None);
                    return AnalysisOutcome::Promote;
                }
                SignalKind::ForceRollback => {
                    return AnalysisOutcome::Rollback("forced after inconclusive canary".into())
                }
                SignalKind::Reject { reason, .. } => {
                    return AnalysisOutcome::Rejected(
                        reason.unwrap_or_else(|| "rejected".into()),
                    )
                }
                SignalKind::Cancel => return AnalysisOutcome::Cancelled,
                SignalKind::Pause | SignalKind::Resume => continue,
            }
        }
    }

    async fn await_approval(&self, run_id: Uuid) -> ApprovalOutcome {
        loop {
            let signal = self.signals.next(run_id).await;
            match signal.kind {
                SignalKind::Approve { actor } => {
                    tracing::info!(%run_id, actor, "run approved");
                    return ApprovalOutcome::Approved;
                }
                SignalKind::ForcePromote => return ApprovalOutcome::Approved,
                SignalKind::Reject { actor, reason } => {
                    tracing::info!(%run_id, actor, "run rejected");
                    return ApprovalOutcome::Rejected(
                        reason.unwrap_or_else(|| "rejected".into()),
                    );
                }
                SignalKind::Cancel => return ApprovalOutcome::Cancelled,
                SignalKind::ForceRollback => return ApprovalOutcome::ForceRollback,
                SignalKind::Pause | SignalKind::Resume => continue,
            }
        }
    }

    /// Drain pending signals at a suspension point.
    async fn drain_signals(&self, run_id: Uuid, _request: &RunRequest) -> SignalOutcome {
        loop {
            let Some(signal) = self.signals.poll(&run_id) else {
                return SignalOutcome::Continue;
            };
            match signal.kind {
                SignalKind::Cancel => return SignalOutcome::Cancel,
                SignalKind::ForceRollback => return SignalOutcome::ForceRollback,
                SignalKind::Pause => {
                    if self.transition(run_id, RunState::Paused, None).is_ok() {
                        // Hold until resume (or cancel).
                        loop {
                            let next = self.signals.next(run_id).await;
                            match next.kind {
                                SignalKind::Resume => {
                                    let _ = self.transition(run_id, RunState::Executing, None);
                                    break;
                                }
                                SignalKind::Cancel => return SignalOutcome::Cancel,
                                SignalKind::ForceRollback => return SignalOutcome::ForceRollback,
                                _ => continue,
                            }
                        }
                    }
                }
                _ => continue,
            }
        }
    }

    /// Drain the rollback stack LIFO through the gate. Failed inverse
    /// operations retry; a persistent failure preserves the stack and
    /// fails the run.
    async fn rollback(
        &self,
        run_id: Uuid,
        request: &RunRequest,
        stack: &DurableStack,
        reason: String,
    ) {
        let _ = self.transition(run_id, RunState::RollingBack, Some(reason.clone()));
        self.emit(
            request,
            EventType::RollbackInitiated,
            serde_json::json!({
                "run_id": run_id,
                "task_id": request.task_id,
                "reason": reason,
                "operations": stack.len(),
            }),
        );

        let rollback_retry = RetryPolicy {
            max_attempts: self.config.rollback_retries.max(1),
            base_delay: Duration::from_millis(self.config.activity_backoff_ms),
            ..RetryPolicy::default()
        };

        while let Some(op) = stack.pop() {
            let ctx = InvocationCtx {
                org_id: request.org_id,
                task_id: request.task_id,
                run_id,
                phase: "rollback".into(),
                agent: "engine".into(),
                autonomy_mode: request.autonomy_mode,
                approval_granted: true,
                simulation_completed: true,
                quality_total: request.quality_total,
                tokens_used: 0,
                dry_run: false,
            };
            let result = rollback_retry
                .run(&op.tool, || {
                    let gate = self.gate.clone();
                    let op = op.clone();
                    let ctx = ctx.clone();
                    async move { gate.invoke(&op.tool, op.params.clone(), &ctx, None).await }
                })
                .await;

            match result {
                Ok(_) => self.record(run_id, RunEvent::InversePopped),
                Err(e) => {
                    // Put the op back so the preserved stack is intact
                    // for manual recovery.
                    stack.ops.lock().push(op);
                    let remaining = stack.len();
                    tracing::error!(%run_id, remaining, error = %e, "rollback operation failed");
                    let _ = self.transition(
                        run_id,
                        RunState::Failed,
                        Some(format!(
                            "rollback failed with {remaining} operations remaining: {e}"
                        )),
                    );
                    self.emit(
                        request,
                        EventType::TaskFailed,
                        serde_json::json!({
                            "task_id": request.task_id,
                            "run_id": run_id,
                            "reason": "rollback_failed",
                            "stack_remaining": remaining,
                        }),
                    );
                    return;
                }
            }
        }

        let _ = self.transition(run_id, RunState::RolledBack, Some(reason));
        self.emit(
            request,
            EventType::TaskFailed,
            serde_json::json!({
                "task_id": request.task_id,
                "run_id": run_id,
                "reason": "rolled_back",
            }),
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cohort selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Select a phase's cohort from assets not yet touched by earlier
/// phases. Percentages apply to the full fleet size.
fn select_cohort(rule: &BatchRule, fleet: &[String], touched: &[String]) -> Vec<String> {
    let remaining: Vec<&String> = fleet.iter().filter(|a| !touched.contains(a)).collect();
    match rule {
        BatchRule::Percent { pct } => {
            let count =
                ((fleet.len() as f64) * (f64::from(*pct) / 100.0)).ceil() as usize;
            remaining
                .into_iter()
                .take(count.min(fleet.len()))
                .cloned()
                .collect()
        }
        BatchRule::Count { count } => remaining.into_iter().take(*count).cloned().collect(),
        BatchRule::Assets { assets } => assets
            .iter()
            .filter(|a| remaining.iter().any(|r| r == a))
            .cloned()
            .collect(),
    }
}

enum DriveOutcome {
    Succeed,
    Fail(String),
    Reject(String),
    Cancel(Arc<DurableStack>),
    Rollback(Arc<DurableStack>, String),
}

enum ApprovalOutcome {
    Approved,
    Rejected(String),
    Cancelled,
    ForceRollback,
}

enum SignalOutcome {
    Continue,
    Cancel,
    ForceRollback,
}

enum AnalysisOutcome {
    Promote,
    Rollback(String),
    Cancelled,
    Rejected(String),
}
