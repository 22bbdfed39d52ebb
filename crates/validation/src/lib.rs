//! The validation pipeline: schema check, policy evaluation, safety
//! pattern scan, and the aggregated quality score that gates which
//! environments a plan may touch.

pub mod artifact;
pub mod policy;
pub mod quality;
pub mod safety;

use std::sync::Arc;

use serde::Serialize;

use rf_domain::plan::Plan;
use rf_domain::score::QualityScore;
use rf_domain::task::{Environment, TaskSpec};
use rf_domain::Result;

pub use artifact::{ArtifactCheck, ArtifactSchemas};
pub use policy::{
    EmbeddedPolicyEngine, PolicyContext, PolicyEngine, PolicyVerdict, RemotePolicyEngine,
};
pub use quality::QualityInputs;
pub use safety::{SafetyReport, SafetyScanner};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// External evidence fed into the quality score alongside the pipeline's
/// own findings.
#[derive(Debug, Clone, Default)]
pub struct ValidationEvidence {
    pub simulation_completed: bool,
    pub simulation_pass_rate: Option<f64>,
    pub historical_success_rate: Option<f64>,
    pub approvals: u32,
    pub has_destructive_tools: bool,
}

/// The pipeline's aggregated output, attached to the plan's task.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    /// Hard failures; any entry fails the task.
    pub errors: Vec<String>,
    /// Informational findings.
    pub warnings: Vec<String>,
    pub policy: PolicyVerdict,
    pub dangerous_patterns: Vec<String>,
    pub quality: QualityScore,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Admissibility per environment: quality threshold met, no policy
    /// denial, no dangerous pattern, and production additionally needs
    /// an approval record when the score demands one.
    pub fn admissible_to(&self, env: Environment, approval_exists: bool) -> bool {
        if !self.is_valid() {
            return false;
        }
        if !self.quality.admits(env) {
            return false;
        }
        if env == Environment::Production && self.quality.requires_approval && !approval_exists {
            return false;
        }
        true
    }
}

pub struct ValidationPipeline {
    schemas: ArtifactSchemas,
    scanner: SafetyScanner,
    policy: Arc<dyn PolicyEngine>,
}

impl ValidationPipeline {
    pub fn new(policy: Arc<dyn PolicyEngine>) -> Self {
        Self {
            schemas: ArtifactSchemas::new(),
            scanner: SafetyScanner::new(),
            policy,
        }
    }

    /// Run all four stages against a plan.
    pub async fn validate(
        &self,
        plan: &Plan,
        spec: &TaskSpec,
        ctx: &PolicyContext,
        evidence: &ValidationEvidence,
    ) -> Result<ValidationOutcome> {
        let mut errors = Vec::new();
        let mut warnings: Vec<String> = plan.warnings.clone();

        // 1. Schema validation.
        let (schema_valid, schema_unknown) =
            match self.schemas.check(&plan.artifact_kind, &plan.artifact) {
                Ok(ArtifactCheck::Valid) => (true, false),
                Ok(ArtifactCheck::UnknownKind(warning)) => {
                    warnings.push(warning);
                    (false, true)
                }
                Err(e) => {
                    errors.push(e.to_string());
                    (false, false)
                }
            };

        // 2. Policy evaluation.
        let policy = self.policy.evaluate_plan(plan, spec, ctx).await?;
        for denial in &policy.deny {
            errors.push(format!("policy denied: {denial}"));
        }
        warnings.extend(policy.warn.iter().cloned());

        // 3. Safety pattern scan.
        let safety = self.scanner.scan(plan, ctx.environment);
        for hit in &safety.hits {
            errors.push(format!("dangerous pattern: {hit}"));
        }
        warnings.extend(safety.warnings.iter().cloned());

        // 4. Quality score.
        let quality = quality::score(&QualityInputs {
            schema_valid,
            schema_unknown,
            policy_denials: policy.deny.len(),
            policy_warnings: policy.warn.len(),
            dangerous_patterns: safety.hits.len(),
            phase_count: plan.phases.len(),
            has_canary: plan.has_canary_phase(),
            phases_bounded: plan
                .phases
                .iter()
                .all(|p| p.rollback_threshold < 1.0 && p.timeout_secs > 0),
            simulation_completed: evidence.simulation_completed,
            simulation_pass_rate: evidence.simulation_pass_rate,
            historical_success_rate: evidence.historical_success_rate,
            approvals: evidence.approvals,
            target: ctx.environment,
            has_destructive_tools: evidence.has_destructive_tools,
        });

        Ok(ValidationOutcome {
            errors,
            warnings,
            policy,
            dangerous_patterns: safety.hits,
            quality,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rf_domain::autonomy::AutonomyMode;
    use rf_domain::config::PolicyConfig;
    use rf_domain::plan::Phase;
    use rf_domain::task::{ActionType, Constraints, TargetSelector};
    use rf_domain::tool::RiskTier;
    use uuid::Uuid;

    fn pipeline() -> ValidationPipeline {
        ValidationPipeline::new(Arc::new(EmbeddedPolicyEngine::new(&PolicyConfig::default())))
    }

    fn spec() -> TaskSpec {
        TaskSpec {
            action: ActionType::DriftRemediate,
            target: TargetSelector {
                environment: Some(Environment::Staging),
                ..TargetSelector::default()
            },
            constraints: Constraints::default(),
            desired_outcome: "converge drift".into(),
        }
    }

    fn valid_plan(spec: &TaskSpec) -> Plan {
        Plan::new(
            Uuid::new_v4(),
            spec,
            "drift_remediation_v1",
            "converge drifted assets",
            vec![Phase::canary(5, 600, "standard"), Phase::rollout("rollout", 100, 300)],
            vec!["config.apply".into()],
            serde_json::json!({
                "summary": "converge drifted assets",
                "phases": [{ "name": "canary", "assets": ["web-1"] }]
            }),
        )
    }

    fn ctx(environment: Option<Environment>) -> PolicyContext {
        PolicyContext {
            org_id: Uuid::new_v4(),
            environment,
            max_risk_tier: Some(RiskTier::MutateMedium),
            autonomy_mode: AutonomyMode::RiskBased,
            tokens_used: 1_000,
        }
    }

    fn evidence() -> ValidationEvidence {
        ValidationEvidence {
            simulation_completed: true,
            simulation_pass_rate: Some(1.0),
            historical_success_rate: Some(0.9),
            approvals: 0,
            has_destructive_tools: false,
        }
    }

    #[tokio::test]
    async fn valid_plan_is_admissible_to_staging() {
        let spec = spec();
        let plan = valid_plan(&spec);
        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Staging)), &evidence())
            .await
            .unwrap();
        assert!(outcome.is_valid(), "{:?}", outcome.errors);
        assert!(outcome.quality.total() >= 60);
        assert!(outcome.admissible_to(Environment::Staging, false));
    }

    #[tokio::test]
    async fn dangerous_pattern_fails_validation() {
        let spec = spec();
        let mut plan = valid_plan(&spec);
        plan.artifact = serde_json::json!({
            "summary": "cleanup",
            "phases": [{ "name": "wipe", "assets": ["all"] }],
            "commands": ["rm -rf /"]
        });
        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Staging)), &evidence())
            .await
            .unwrap();
        assert!(!outcome.is_valid());
        assert!(!outcome.dangerous_patterns.is_empty());
        assert!(!outcome.admissible_to(Environment::Dev, false));
        assert_eq!(outcome.quality.policy_compliance, 0);
    }

    #[tokio::test]
    async fn schema_violation_fails_validation() {
        let spec = spec();
        let mut plan = valid_plan(&spec);
        plan.artifact = serde_json::json!({ "summary": "missing phases" });
        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Staging)), &evidence())
            .await
            .unwrap();
        assert!(!outcome.is_valid());
        assert!(outcome.errors[0].contains("drift_remediation_v1"));
    }

    #[tokio::test]
    async fn unknown_artifact_kind_warns_but_passes() {
        let spec = spec();
        let mut plan = valid_plan(&spec);
        plan.artifact_kind = "novel_artifact_v9".into();
        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Staging)), &evidence())
            .await
            .unwrap();
        assert!(outcome.is_valid());
        assert!(outcome.warnings.iter().any(|w| w.contains("novel_artifact_v9")));
    }

    #[tokio::test]
    async fn production_requires_approval_when_score_demands_it() {
        let spec = spec();
        let plan = valid_plan(&spec);
        // Perfect history lands the total at 80: past the production bar,
        // under the bulk bar.
        let mut strong = evidence();
        strong.historical_success_rate = Some(1.0);
        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Production)), &strong)
            .await
            .unwrap();
        // Quality passes the production bar but is under the bulk bar.
        assert!(outcome.quality.admits(Environment::Production));
        assert!(outcome.quality.requires_approval);
        assert!(!outcome.admissible_to(Environment::Production, false));
        assert!(outcome.admissible_to(Environment::Production, true));
    }

    #[tokio::test]
    async fn low_quality_blocks_higher_environments() {
        let spec = spec();
        let mut plan = valid_plan(&spec);
        plan.phases.clear(); // no phases, no canary
        let mut thin = evidence();
        thin.simulation_completed = false;
        thin.historical_success_rate = None;

        let outcome = pipeline()
            .validate(&plan, &spec, &ctx(Some(Environment::Staging)), &thin)
            .await
            .unwrap();
        assert!(outcome.is_valid());
        assert!(outcome.quality.total() < 60, "total={}", outcome.quality.total());
        assert!(!outcome.admissible_to(Environment::Staging, false));
        assert!(outcome.admissible_to(Environment::Dev, false));
    }
}
