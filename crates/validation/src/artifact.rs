//! Artifact schema validation.
//!
//! Each planning agent produces one of a fixed set of artifact families;
//! the body is validated against the family's JSON-Schema. Unknown
//! families pass through with a warning rather than an error so new
//! agents can ship artifacts before the registry learns their schema.

use std::collections::HashMap;

use jsonschema::JSONSchema;

use rf_domain::{Error, Result};

pub struct ArtifactSchemas {
    compiled: HashMap<&'static str, JSONSchema>,
}

/// Outcome of validating one artifact body.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactCheck {
    Valid,
    /// Schema family is not registered; carries the warning text.
    UnknownKind(String),
}

impl ArtifactSchemas {
    pub fn new() -> Self {
        let mut compiled = HashMap::new();
        for (kind, schema) in schema_documents() {
            let compiled_schema = JSONSchema::compile(&schema)
                .unwrap_or_else(|e| panic!("embedded schema {kind} is invalid: {e}"));
            compiled.insert(kind, compiled_schema);
        }
        Self { compiled }
    }

    /// Validate `artifact` against the schema for `kind`.
    pub fn check(&self, kind: &str, artifact: &serde_json::Value) -> Result<ArtifactCheck> {
        let Some(schema) = self.compiled.get(kind) else {
            return Ok(ArtifactCheck::UnknownKind(format!(
                "unknown artifact schema {kind}, passed through unvalidated"
            )));
        };
        if let Err(errors) = schema.validate(artifact) {
            let detail: Vec<String> = errors.take(5).map(|e| e.to_string()).collect();
            return Err(Error::SchemaInvalid(format!(
                "{kind}: {}",
                detail.join("; ")
            )));
        }
        Ok(ArtifactCheck::Valid)
    }

    pub fn known_kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.compiled.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for ArtifactSchemas {
    fn default() -> Self {
        Self::new()
    }
}

fn schema_documents() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "drift_remediation_v1",
            serde_json::json!({
                "type": "object",
                "required": ["summary", "phases"],
                "properties": {
                    "summary": { "type": "string" },
                    "phases": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["name", "assets"],
                            "properties": {
                                "name": { "type": "string" },
                                "assets": { "type": "array", "items": { "type": "string" } }
                            }
                        }
                    }
                }
            }),
        ),
        (
            "patch_rollout_v1",
            serde_json::json!({
                "type": "object",
                "required": ["summary", "patches", "schedule"],
                "properties": {
                    "summary": { "type": "string" },
                    "patches": { "type": "array" },
                    "schedule": { "type": "object" }
                }
            }),
        ),
        (
            "compliance_report_v1",
            serde_json::json!({
                "type": "object",
                "required": ["summary", "controls", "findings"],
                "properties": {
                    "summary": { "type": "string" },
                    "controls": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["id", "status"],
                            "properties": {
                                "id": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["passed", "failed", "waived", "unknown"]
                                }
                            }
                        }
                    },
                    "findings": { "type": "array" }
                }
            }),
        ),
        (
            "dr_runbook_v1",
            serde_json::json!({
                "type": "object",
                "required": ["summary", "steps", "recovery_objectives"],
                "properties": {
                    "summary": { "type": "string" },
                    "steps": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["order", "action"],
                            "properties": {
                                "order": { "type": "integer" },
                                "action": { "type": "string" }
                            }
                        }
                    },
                    "recovery_objectives": {
                        "type": "object",
                        "required": ["rto", "rpo"]
                    }
                }
            }),
        ),
        (
            "execution_plan_v1",
            serde_json::json!({
                "type": "object",
                "required": ["phases", "rollback_policy"],
                "properties": {
                    "phases": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["batch", "wait", "health_check"]
                        }
                    },
                    "rollback_policy": {
                        "type": "object",
                        "required": ["type", "threshold", "window_minutes"]
                    }
                }
            }),
        ),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
