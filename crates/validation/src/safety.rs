//! Safety pattern scan: a fixed deny-list of catastrophic operations
//! matched against the serialized plan content. Any hit is an error, not
//! a warning. The pattern set is compiled once at startup.

use regex::RegexSet;

use rf_domain::plan::Plan;
use rf_domain::task::Environment;

/// (pattern, human label) pairs. Case-insensitive.
const DENY_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)rm\s+(-[a-z]*\s+)*-[a-z]*r[a-z]*f|rm\s+-rf", "recursive filesystem delete"),
    (r"(?i)drop\s+(database|table|schema)", "database drop"),
    (r"(?i)mkfs(\.\w+)?\s", "filesystem format"),
    (r"(?i)format\s+[c-z]:", "disk format"),
    (r":\(\)\s*\{\s*:\|:\s*&\s*\}\s*;:", "fork bomb"),
    (r"(?i)dd\s+if=.*of=/dev/(sd|nvme|xvd)", "raw disk overwrite"),
    (r"(?i)shred\s+(-\w+\s+)*/dev/", "disk wipe"),
    (r"(?i)del\s+/s\s+/q\s+[c-z]:\\", "recursive windows delete"),
];

pub struct SafetyScanner {
    set: RegexSet,
}

#[derive(Debug, Clone, Default)]
pub struct SafetyReport {
    /// Labels of matched deny patterns. Non-empty = validation error.
    pub hits: Vec<String>,
    /// Advisory findings (e.g. production plan without a canary phase).
    pub warnings: Vec<String>,
}

impl SafetyReport {
    pub fn is_dangerous(&self) -> bool {
        !self.hits.is_empty()
    }
}

impl SafetyScanner {
    pub fn new() -> Self {
        let set = RegexSet::new(DENY_PATTERNS.iter().map(|(p, _)| *p))
            .expect("deny patterns are valid regexes");
        Self { set }
    }

    /// Scan the serialized plan (artifact body included) and apply the
    /// environment-specific advisories.
    pub fn scan(&self, plan: &Plan, target: Option<Environment>) -> SafetyReport {
        let serialized = serde_json::to_string(plan).unwrap_or_default();
        let hits: Vec<String> = self
            .set
            .matches(&serialized)
            .into_iter()
            .map(|i| DENY_PATTERNS[i].1.to_string())
            .collect();

        let mut warnings = Vec::new();
        if target == Some(Environment::Production) && !plan.has_canary_phase() {
            warnings.push("production plan has no canary phase".to_string());
        }

        SafetyReport { hits, warnings }
    }
}

impl Default for SafetyScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rf_domain::plan::Phase;
    use rf_domain::task::{ActionType, Constraints, TargetSelector, TaskSpec};
    use uuid::Uuid;

    fn plan_with_artifact(artifact: serde_json::Value, phases: Vec<Phase>) -> Plan {
        let spec = TaskSpec {
            action: ActionType::DriftRemediate,
            target: TargetSelector::default(),
            constraints: Constraints::default(),
            desired_outcome: "test".into(),
        };
        Plan::new(
            Uuid::new_v4(),
            &spec,
            "drift_remediation_v1",
            "test plan",
            phases,
            vec!["inventory.list".into()],
            artifact,
        )
    }

    #[test]
    fn clean_plan_passes() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "summary": "restart the web tier service" }),
            vec![Phase::canary(5, 600, "standard")],
        );
        let report = scanner.scan(&plan, Some(Environment::Staging));
        assert!(!report.is_dangerous());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn recursive_delete_detected() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "commands": ["rm -rf /"] }),
            vec![],
        );
        let report = scanner.scan(&plan, None);
        assert!(report.is_dangerous());
        assert!(report.hits.iter().any(|h| h.contains("recursive")));
    }

    #[test]
    fn drop_database_detected() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "sql": "DROP DATABASE customers" }),
            vec![],
        );
        assert!(scanner.scan(&plan, None).is_dangerous());
    }

    #[test]
    fn fork_bomb_detected() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "script": ":(){ :|: & };:" }),
            vec![],
        );
        assert!(scanner.scan(&plan, None).is_dangerous());
    }

    #[test]
    fn disk_overwrite_detected() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "cmd": "dd if=/dev/zero of=/dev/sda bs=1M" }),
            vec![],
        );
        assert!(scanner.scan(&plan, None).is_dangerous());
    }

    #[test]
    fn production_without_canary_warns() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({ "summary": "direct rollout" }),
            vec![Phase::rollout("all", 100, 0)],
        );
        let report = scanner.scan(&plan, Some(Environment::Production));
        assert!(!report.is_dangerous());
        assert_eq!(report.warnings.len(), 1);

        // Same plan against staging does not warn.
        let report = scanner.scan(&plan, Some(Environment::Staging));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn benign_words_do_not_match() {
        let scanner = SafetyScanner::new();
        let plan = plan_with_artifact(
            serde_json::json!({
                "summary": "perform a dropdown format review and armful of patches"
            }),
            vec![],
        );
        assert!(!scanner.scan(&plan, None).is_dangerous());
    }
}
