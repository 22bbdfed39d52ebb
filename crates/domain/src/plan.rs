//! Plans and phases — the executable output of the planning agents.
//!
//! Plans are content-addressed: a fingerprint over the normalized TaskSpec
//! and the ordered tool list lets identical requests share a cached plan
//! within the planner cache TTL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::task::TaskSpec;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a phase selects its asset cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchRule {
    /// A percentage of the not-yet-touched target fleet.
    Percent { pct: u8 },
    /// An explicit asset list.
    Assets { assets: Vec<String> },
    /// A fixed number of assets.
    Count { count: usize },
}

/// One rollout phase: a cohort, a dwell, and promotion criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub batch: BatchRule,
    /// Dwell between cohort completion and metric evaluation, seconds.
    pub wait_secs: u64,
    /// Hard timeout for the whole phase, seconds.
    #[serde(default = "d_phase_timeout")]
    pub timeout_secs: u64,
    /// Marks the initial small-cohort validation phase.
    #[serde(default)]
    pub canary: bool,
    /// Cohort failure rate above which the run rolls back (0.0 - 1.0).
    #[serde(default = "d_rollback_threshold")]
    pub rollback_threshold: f64,
    /// Bounded parallelism for tool invocations within the cohort.
    #[serde(default = "d_max_parallel")]
    pub max_parallel: usize,
    /// Canary template to evaluate at dwell end. `None` = no analysis,
    /// the phase promotes on cohort success alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_template: Option<String>,
    /// Named health checks that must pass before the phase starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,
    /// Fail the phase when the selector produces an empty cohort.
    #[serde(default)]
    pub strict_non_empty: bool,
}

fn d_phase_timeout() -> u64 {
    3_600
}

fn d_rollback_threshold() -> f64 {
    0.2
}

fn d_max_parallel() -> usize {
    4
}

impl Phase {
    /// A conventional canary phase: small percentage, dwell, analysis.
    pub fn canary(pct: u8, wait_secs: u64, template: impl Into<String>) -> Self {
        Self {
            name: "canary".into(),
            batch: BatchRule::Percent { pct },
            wait_secs,
            timeout_secs: d_phase_timeout(),
            canary: true,
            rollback_threshold: d_rollback_threshold(),
            max_parallel: d_max_parallel(),
            metric_template: Some(template.into()),
            preconditions: Vec::new(),
            strict_non_empty: true,
        }
    }

    /// A full-fleet rollout phase.
    pub fn rollout(name: impl Into<String>, pct: u8, wait_secs: u64) -> Self {
        Self {
            name: name.into(),
            batch: BatchRule::Percent { pct },
            wait_secs,
            timeout_secs: d_phase_timeout(),
            canary: false,
            rollback_threshold: d_rollback_threshold(),
            max_parallel: d_max_parallel(),
            metric_template: None,
            preconditions: Vec::new(),
            strict_non_empty: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Artifact schema family this plan validates against
    /// (e.g. "drift_remediation_v1", "execution_plan_v1").
    pub artifact_kind: String,
    pub summary: String,
    pub phases: Vec<Phase>,
    /// Ordered tool names the plan will invoke, used for fingerprinting
    /// and policy pre-checks.
    pub tools: Vec<String>,
    /// Raw artifact body as produced by the planning agent, validated
    /// against the artifact schema.
    pub artifact: serde_json::Value,
    /// Content fingerprint over (normalized TaskSpec, tool list).
    pub fingerprint: String,
    /// Non-fatal findings accumulated during planning and validation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(
        task_id: Uuid,
        spec: &TaskSpec,
        artifact_kind: impl Into<String>,
        summary: impl Into<String>,
        phases: Vec<Phase>,
        tools: Vec<String>,
        artifact: serde_json::Value,
    ) -> Self {
        let fingerprint = fingerprint(spec, &tools);
        Self {
            id: Uuid::new_v4(),
            task_id,
            artifact_kind: artifact_kind.into(),
            summary: summary.into(),
            phases,
            tools,
            artifact,
            fingerprint,
            warnings: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn has_canary_phase(&self) -> bool {
        self.phases.iter().any(|p| p.canary)
    }
}

/// Content fingerprint: sha256 over the canonical TaskSpec JSON and the
/// ordered tool list, hex-encoded and truncated to 32 chars. Equal specs
/// and tool lists always produce equal fingerprints.
pub fn fingerprint(spec: &TaskSpec, tools: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec.canonical_json().as_bytes());
    for tool in tools {
        hasher.update(b"\x1f");
        hasher.update(tool.as_bytes());
    }
    hex::encode(hasher.finalize())[..32].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
