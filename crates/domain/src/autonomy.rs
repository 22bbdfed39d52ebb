//! Per-org autonomy policy: how much the engine may do without a human.

use serde::{Deserialize, Serialize};

use crate::score::RiskLevel;
use crate::task::{Environment, HoursWindow};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Modes and decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutonomyMode {
    /// Produce a plan, never execute.
    PlanOnly,
    /// Every execution requires a human approval.
    ApproveAll,
    /// Only the canary phase may run unattended.
    CanaryOnly,
    /// Auto-approve under a risk ceiling, inside allowed hours.
    RiskBased,
    /// Auto-approve everything that passes the guardrails.
    FullAuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyDecision {
    AutoApprove,
    RequireApproval,
    Block,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-org configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    pub mode: AutonomyMode,
    /// Highest risk level that may auto-approve in risk-based mode.
    #[serde(default = "d_max_auto_risk")]
    pub max_auto_risk: RiskLevel,
    /// Full-auto refuses plans without a canary phase when set.
    #[serde(default = "d_true")]
    pub require_canary: bool,
    /// Hours (org-local) in which unattended execution is allowed.
    #[serde(default = "d_allowed_hours")]
    pub allowed_hours: HoursWindow,
    /// IANA timezone the window is evaluated in.
    #[serde(default = "d_timezone")]
    pub timezone: String,
    /// Environments never executed unattended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_environments: Vec<Environment>,
}

fn d_max_auto_risk() -> RiskLevel {
    RiskLevel::Low
}

fn d_true() -> bool {
    true
}

fn d_allowed_hours() -> HoursWindow {
    HoursWindow::ALL_DAY
}

fn d_timezone() -> String {
    "UTC".into()
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            mode: AutonomyMode::ApproveAll,
            max_auto_risk: d_max_auto_risk(),
            require_canary: d_true(),
            allowed_hours: d_allowed_hours(),
            timezone: d_timezone(),
            excluded_environments: Vec::new(),
        }
    }
}

impl AutonomyConfig {
    /// Whether an environment is excluded from unattended execution.
    /// For multi-env plans, exclusion applies if ANY target is excluded.
    pub fn excludes(&self, envs: &[Environment]) -> bool {
        envs.iter().any(|e| self.excluded_environments.contains(e))
    }
}
