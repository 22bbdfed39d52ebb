//! Prompt templates. Slots use `{name}` syntax and are filled by
//! [`render`]; templates never reach a provider with a slot unfilled.

/// Meta-prompt used by the router to normalize free text into a task
/// spec. The output grammar is pinned by the JSON skeleton; the model
/// must answer with that object and nothing else.
pub const TASK_SPEC_ROUTER: &str = r#"You translate an operator request into a structured
infrastructure task. Answer with ONLY a JSON object of this exact shape:

{
  "action": "<one of: drift-remediate | patch-rollout | compliance-audit | dr-drill | security-scan | cost-optimize | image-refresh | sop-generate | adapter-sync | incident-triage>",
  "target": {
    "platform": "<aws|azure|gcp|vsphere|kubernetes or null>",
    "environment": "<dev|staging|production|dr or null>",
    "tags": { "<key>": "<value>" },
    "name_glob": "<glob or null>"
  },
  "constraints": {
    "excluded_environments": [],
    "max_blast_radius_pct": null
  },
  "desired_outcome": "<one sentence>"
}

If the request is not an infrastructure task, or you cannot determine the
action with confidence, answer with {"action": null}.

Operator request:
{intent}
"#;

pub const DRIFT_AGENT: &str = r#"You are the drift remediation specialist.
Produce a drift_remediation_v1 plan as JSON: {"summary": "...", "phases": [{"name": "...", "assets": ["..."]}]}.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const PATCH_AGENT: &str = r#"You are the patch rollout specialist.
Produce a patch_rollout_v1 plan as JSON: {"summary": "...", "patches": [...], "schedule": {...}}.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const COMPLIANCE_AGENT: &str = r#"You are the compliance specialist.
Produce a compliance_report_v1 as JSON: {"summary": "...", "controls": [{"id": "...", "status": "passed|failed|waived|unknown"}], "findings": []}.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const DR_AGENT: &str = r#"You are the disaster-recovery specialist.
Produce a dr_runbook_v1 as JSON: {"summary": "...", "steps": [{"order": 1, "action": "..."}], "recovery_objectives": {"rto": "...", "rpo": "..."}}.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const SECURITY_AGENT: &str = r#"You are the security specialist.
Produce a compliance_report_v1 as JSON with CVE findings.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const COST_AGENT: &str = r#"You are the cost optimization specialist.
Produce an execution_plan_v1 as JSON: {"phases": [{"batch": "...", "wait": "...", "health_check": "..."}], "rollback_policy": {"type": "...", "threshold": 0.2, "window_minutes": 30}}.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const IMAGE_AGENT: &str = r#"You are the golden image specialist.
Produce an execution_plan_v1 as JSON covering image build and staged reimaging.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const SOP_AGENT: &str = r#"You are the SOP author.
Produce a dr_runbook_v1 as JSON documenting the operating procedure step by step.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const ADAPTER_AGENT: &str = r#"You are the connector synchronization specialist.
Produce an execution_plan_v1 as JSON reconciling adapter state.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

pub const INCIDENT_AGENT: &str = r#"You are the incident triage specialist.
Produce an execution_plan_v1 as JSON with the mitigation steps, smallest blast radius first.
Available tools:
{tools}

Context:
{context}

Task:
{intent}
"#;

/// Fill `{name}` slots. Unknown slots in the template are left intact;
/// unknown keys are ignored.
pub fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in slots {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_slots() {
        let out = render("do {what} on {env}", &[("what", "patching"), ("env", "staging")]);
        assert_eq!(out, "do patching on staging");
    }

    #[test]
    fn render_leaves_unknown_slots() {
        let out = render("{a} {b}", &[("a", "x")]);
        assert_eq!(out, "x {b}");
    }

    #[test]
    fn router_prompt_has_intent_slot() {
        let out = render(TASK_SPEC_ROUTER, &[("intent", "fix drift on staging web tier")]);
        assert!(out.contains("fix drift on staging web tier"));
        assert!(!out.contains("{intent}"));
    }
}
