//! Task records and the normalized intent (`TaskSpec`) they carry.
//!
//! A `Task` is the unit the control plane accepts from users: a free-text
//! intent plus the parsed, validated spec and the scores attached along the
//! way. Tasks are mutated only through the workflow state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::autonomy::AutonomyDecision;
use crate::score::{QualityScore, RiskScore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    AwaitingApproval,
    Executing,
    Paused,
    Succeeded,
    Failed,
    RolledBack,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::RolledBack | Self::Cancelled
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deployment environment a plan targets. Ordering matters for quality
/// thresholds: each environment has a minimum admissible quality total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Staging,
    Production,
    /// Disaster-recovery site.
    Dr,
}

impl Environment {
    /// Risk multiplier applied to the weighted factor sum.
    pub fn risk_multiplier(self) -> f64 {
        match self {
            Environment::Production => 1.5,
            Environment::Dr => 1.2,
            Environment::Staging => 1.0,
            Environment::Dev => 0.5,
        }
    }

    /// Minimum quality total required for a plan to touch this environment.
    pub fn quality_threshold(self) -> u8 {
        match self {
            Environment::Dev => 40,
            Environment::Staging => 60,
            // DR sites are held to the production bar.
            Environment::Production | Environment::Dr => 80,
        }
    }

    /// Threshold for bulk (non-canaried, wide-batch) production changes.
    pub const PRODUCTION_BULK_THRESHOLD: u8 = 90;

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Dr => "dr",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            "dr" | "disaster-recovery" => Ok(Environment::Dr),
            other => Err(crate::error::Error::Config(format!(
                "unknown environment: {other}"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskSpec — normalized intent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Action families the router recognizes. Each maps to a primary
/// specialist agent; some imply a secondary agent (e.g. a patch rollout
/// implies a compliance check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    DriftRemediate,
    PatchRollout,
    ComplianceAudit,
    DrDrill,
    SecurityScan,
    CostOptimize,
    ImageRefresh,
    SopGenerate,
    AdapterSync,
    IncidentTriage,
}

impl ActionType {
    pub const ALL: [ActionType; 10] = [
        ActionType::DriftRemediate,
        ActionType::PatchRollout,
        ActionType::ComplianceAudit,
        ActionType::DrDrill,
        ActionType::SecurityScan,
        ActionType::CostOptimize,
        ActionType::ImageRefresh,
        ActionType::SopGenerate,
        ActionType::AdapterSync,
        ActionType::IncidentTriage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::DriftRemediate => "drift-remediate",
            ActionType::PatchRollout => "patch-rollout",
            ActionType::ComplianceAudit => "compliance-audit",
            ActionType::DrDrill => "dr-drill",
            ActionType::SecurityScan => "security-scan",
            ActionType::CostOptimize => "cost-optimize",
            ActionType::ImageRefresh => "image-refresh",
            ActionType::SopGenerate => "sop-generate",
            ActionType::AdapterSync => "adapter-sync",
            ActionType::IncidentTriage => "incident-triage",
        }
    }
}

/// Which assets a task operates on. All selector fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSelector {
    /// Platform hint (e.g. "aws", "azure", "kubernetes"). `None` = any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub environment: Option<Environment>,
    /// Tag equality filters, sorted for stable fingerprints.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Glob over asset names (e.g. "web-*").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_glob: Option<String>,
}

/// Hard limits the planner must respect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Maintenance window in org-local hours, inclusive start, exclusive end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_window: Option<HoursWindow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_environments: Vec<Environment>,
    /// Maximum fraction of the fleet a single phase may touch (percent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_blast_radius_pct: Option<u8>,
}

/// Hour-of-day window. `start == end` means the full day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoursWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl HoursWindow {
    pub const ALL_DAY: HoursWindow = HoursWindow { start_hour: 0, end_hour: 0 };

    /// Whether the given hour (0-23) falls inside the window. Windows may
    /// wrap midnight (e.g. 22..6).
    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour == self.end_hour {
            return true;
        }
        if self.start_hour < self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Normalized, immutable form of a user intent. Produced once by the
/// router and never mutated afterwards; the plan fingerprint hashes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub action: ActionType,
    pub target: TargetSelector,
    #[serde(default)]
    pub constraints: Constraints,
    pub desired_outcome: String,
}

impl TaskSpec {
    /// Canonical JSON used for fingerprinting and cache identity. Field
    /// order is fixed by the struct; maps are BTreeMaps, so serialization
    /// is byte-stable for equal specs.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user: String,
    /// Free-text intent as submitted.
    pub intent: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<TaskSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomy: Option<AutonomyDecision>,
    /// Machine-readable reason code for terminal states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    /// Operator-readable narrative for terminal states.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(org_id: Uuid, user: impl Into<String>, intent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            user: user.into(),
            intent: intent.into(),
            status: TaskStatus::Pending,
            spec: None,
            plan_id: None,
            run_id: None,
            quality: None,
            risk: None,
            autonomy: None,
            reason_code: None,
            reason: None,
            dry_run: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a terminal outcome with its reason taxonomy entry.
    pub fn finish(&mut self, status: TaskStatus, code: &str, narrative: impl Into<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.reason_code = Some(code.to_string());
        self.reason = Some(narrative.into());
        self.updated_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
