//! Tool descriptors and the audit records their invocations leave behind.
//!
//! A tool is a declarative callable capability over infrastructure. The
//! descriptor is registered once at process start and never mutated; every
//! side effect in the system flows through an invocation of one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Risk tiers and scopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How much damage a tool can do. Ordering is meaningful: policy rules
/// express ceilings as "at most `MutateMedium`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskTier {
    Read,
    MutateLow,
    MutateMedium,
    MutateHigh,
    Destructive,
}

impl RiskTier {
    pub fn is_mutating(self) -> bool {
        !matches!(self, RiskTier::Read)
    }
}

/// Blast-radius scope of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolScope {
    Global,
    Org,
    Site,
    Asset,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Stable name, e.g. "compute.describe_instances".
    pub name: String,
    pub version: String,
    pub description: String,
    /// JSON-Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    /// JSON-Schema for the tool's result.
    pub result_schema: serde_json::Value,
    pub risk: RiskTier,
    pub scope: ToolScope,
    /// Safe to retry with identical parameters.
    pub idempotent: bool,
    /// Capabilities a bound connector must provide.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    /// Relative cost estimate used for budgeting, arbitrary units.
    #[serde(default)]
    pub cost_estimate: f64,
    /// Per-invocation timeout, seconds.
    #[serde(default = "d_tool_timeout")]
    pub timeout_secs: u64,
}

fn d_tool_timeout() -> u64 {
    60
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invocation records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured inverse operation pushed onto the rollback stack when a
/// mutating invocation succeeds. Re-enters the gate as a normal call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseOp {
    pub tool: String,
    pub params: serde_json::Value,
}

/// Outcome of a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Ok { result: serde_json::Value },
    Failed { message: String },
}

impl InvocationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, InvocationOutcome::Ok { .. })
    }
}

/// Append-only audit record of one tool call under a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub run_id: Uuid,
    pub phase: String,
    pub tool: String,
    /// Parameters with sensitive fields redacted.
    pub params: serde_json::Value,
    /// Agent that requested the call.
    pub agent: String,
    pub outcome: InvocationOutcome,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idempotency keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dedupe key for non-idempotent tools: retries within the same workflow
/// execution must not re-dispatch the side effect.
pub fn idempotency_key(run_id: Uuid, phase: &str, tool: &str, params: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(phase.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(tool.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(params.to_string().as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parameter redaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "api_key", "credential"];

/// Replace values of sensitive-looking keys with `"***"` before a
/// parameter object enters the audit log.
pub fn redact_params(params: &serde_json::Value) -> serde_json::Value {
    match params {
        serde_json::Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                        (k.clone(), serde_json::Value::String("***".into()))
                    } else {
                        (k.clone(), redact_params(v))
                    }
                })
                .collect();
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_params).collect())
        }
        other => other.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
