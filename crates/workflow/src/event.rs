//! The run event log and its pure reducer.
//!
//! Every accepted decision is an event appended to the run's log before
//! its effects are dispatched; the [`Run`] snapshot is a fold over the
//! log. Resume rebuilds the snapshot by replaying, which makes crash
//! recovery deterministic by construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rf_domain::tool::InverseOp;

use crate::state::RunState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Created {
        run_id: Uuid,
        task_id: Uuid,
        org_id: Uuid,
        plan_id: Uuid,
    },
    Transitioned {
        to: RunState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PhaseStarted {
        index: usize,
        name: String,
        cohort: Vec<String>,
    },
    AssetCompleted {
        phase: usize,
        asset: String,
        ok: bool,
    },
    PhaseCompleted {
        index: usize,
        failure_rate: f64,
    },
    CanaryVerdict {
        index: usize,
        verdict: String,
    },
    InversePushed {
        op: InverseOp,
    },
    InversePopped,
    SignalApplied {
        signal_id: Uuid,
        #[serde(rename = "signal_kind")]
        kind: String,
    },
}

/// Envelope persisted to the run's JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Materialized view of one run, derived purely from its event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub task_id: Uuid,
    pub org_id: Uuid,
    pub plan_id: Uuid,
    pub state: RunState,
    /// Index of the phase currently (or next to be) executed.
    pub phase_cursor: usize,
    /// Asset cohorts per started phase.
    pub cohorts: Vec<Vec<String>>,
    /// Inverse operations not yet rolled back, oldest first.
    pub rollback_stack: Vec<InverseOp>,
    /// Canary verdicts per analyzed phase.
    pub verdicts: Vec<String>,
    /// Every state the run has occupied, in order.
    pub state_history: Vec<RunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Run {
    fn empty() -> Self {
        Self {
            id: Uuid::nil(),
            task_id: Uuid::nil(),
            org_id: Uuid::nil(),
            plan_id: Uuid::nil(),
            state: RunState::Created,
            phase_cursor: 0,
            cohorts: Vec::new(),
            rollback_stack: Vec::new(),
            verdicts: Vec::new(),
            state_history: vec![RunState::Created],
            reason: None,
        }
    }

    /// Fold an event into the snapshot. Pure, total, replay-safe.
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Created { run_id, task_id, org_id, plan_id } => {
                self.id = *run_id;
                self.task_id = *task_id;
                self.org_id = *org_id;
                self.plan_id = *plan_id;
            }
            RunEvent::Transitioned { to, reason } => {
                self.state = *to;
                self.state_history.push(*to);
                if reason.is_some() {
                    self.reason = reason.clone();
                }
            }
            RunEvent::PhaseStarted { index, cohort, .. } => {
                self.phase_cursor = *index;
                while self.cohorts.len() <= *index {
                    self.cohorts.push(Vec::new());
                }
                self.cohorts[*index] = cohort.clone();
            }
            RunEvent::AssetCompleted { .. } => {}
            RunEvent::PhaseCompleted { index, .. } => {
                self.phase_cursor = index + 1;
            }
            RunEvent::CanaryVerdict { verdict, .. } => {
                self.verdicts.push(verdict.clone());
            }
            RunEvent::InversePushed { op } => {
                self.rollback_stack.push(op.clone());
            }
            RunEvent::InversePopped => {
                self.rollback_stack.pop();
            }
            RunEvent::SignalApplied { .. } => {}
        }
    }

    /// Rebuild a snapshot from an ordered event log.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a RunEvent>) -> Self {
        let mut run = Self::empty();
        for event in events {
            run.apply(event);
        }
        run
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
