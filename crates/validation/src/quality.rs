//! Quality scoring: five dimensions, 0-20 each, computed from concrete
//! sub-checks over the validation output, test results, operational
//! history, and human approvals.

use rf_domain::score::QualityScore;
use rf_domain::task::Environment;

/// Everything the scorer looks at. Assembled by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct QualityInputs {
    /// Artifact validated against a known schema.
    pub schema_valid: bool,
    /// Artifact family was unknown (passed through with a warning).
    pub schema_unknown: bool,
    pub policy_denials: usize,
    pub policy_warnings: usize,
    pub dangerous_patterns: usize,
    pub phase_count: usize,
    pub has_canary: bool,
    /// Every phase has a rollback threshold below 1.0 and a timeout.
    pub phases_bounded: bool,
    pub simulation_completed: bool,
    /// Pass rate of the simulation's checks, 0.0 - 1.0.
    pub simulation_pass_rate: Option<f64>,
    /// Historical success rate for this artifact family, 0.0 - 1.0.
    pub historical_success_rate: Option<f64>,
    /// Distinct human approvals recorded for this plan.
    pub approvals: u32,
    pub target: Option<Environment>,
    pub has_destructive_tools: bool,
}

/// Compute the five dimensions. Pure.
pub fn score(inputs: &QualityInputs) -> QualityScore {
    // Structural: schema (8), non-empty phasing (4), bounded phases (4),
    // canary presence (4).
    let schema_points = if inputs.schema_valid {
        8
    } else if inputs.schema_unknown {
        4
    } else {
        0
    };
    let structural = schema_points
        + if inputs.phase_count > 0 { 4 } else { 0 }
        + if inputs.phases_bounded { 4 } else { 0 }
        + if inputs.has_canary { 4 } else { 0 };

    // Policy compliance: any denial or dangerous pattern zeroes the
    // dimension; warnings shave points down to a floor.
    let policy_compliance = if inputs.policy_denials > 0 || inputs.dangerous_patterns > 0 {
        0
    } else {
        let shaved = 20_i32 - 4 * inputs.policy_warnings as i32;
        shaved.max(8) as u8
    };

    // Test coverage: a completed simulation is worth half, its pass rate
    // the other half. Without one, a canary phase still earns partial
    // credit: metric-gated promotion is the plan's built-in test.
    let test_coverage = if inputs.simulation_completed {
        let rate = inputs.simulation_pass_rate.unwrap_or(1.0).clamp(0.0, 1.0);
        10 + (rate * 10.0).round() as u8
    } else if inputs.has_canary {
        12
    } else {
        0
    };

    // Operational history: family success rate scaled; no history is
    // neutral, not zero.
    let operational_history = match inputs.historical_success_rate {
        Some(rate) => (rate.clamp(0.0, 1.0) * 20.0).round() as u8,
        None => 10,
    };

    // Human review: none 0, one 12, two or more 20.
    let human_review = match inputs.approvals {
        0 => 0,
        1 => 12,
        _ => 20,
    };

    let mut quality = QualityScore {
        structural,
        policy_compliance,
        test_coverage,
        operational_history,
        human_review,
        requires_approval: false,
    };
    quality.requires_approval = inputs.has_destructive_tools
        || (inputs.target == Some(Environment::Production)
            && quality.total() < Environment::PRODUCTION_BULK_THRESHOLD);
    quality
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn good_inputs() -> QualityInputs {
        QualityInputs {
            schema_valid: true,
            schema_unknown: false,
            policy_denials: 0,
            policy_warnings: 0,
            dangerous_patterns: 0,
            phase_count: 2,
            has_canary: true,
            phases_bounded: true,
            simulation_completed: true,
            simulation_pass_rate: Some(1.0),
            historical_success_rate: Some(0.95),
            approvals: 2,
            target: Some(Environment::Staging),
            has_destructive_tools: false,
        }
    }

    #[test]
    fn clean_plan_scores_high() {
        let quality = score(&good_inputs());
        assert_eq!(quality.structural, 20);
        assert_eq!(quality.policy_compliance, 20);
        assert_eq!(quality.test_coverage, 20);
        assert_eq!(quality.operational_history, 19);
        assert_eq!(quality.human_review, 20);
        assert_eq!(quality.total(), 99);
        assert!(!quality.requires_approval);
        assert!(quality.admits(Environment::Production));
        assert!(quality.admits_production_bulk());
    }

    #[test]
    fn policy_denial_zeroes_compliance() {
        let mut inputs = good_inputs();
        inputs.policy_denials = 1;
        let quality = score(&inputs);
        assert_eq!(quality.policy_compliance, 0);
    }

    #[test]
    fn dangerous_pattern_zeroes_compliance() {
        let mut inputs = good_inputs();
        inputs.dangerous_patterns = 1;
        assert_eq!(score(&inputs).policy_compliance, 0);
    }

    #[test]
    fn warnings_shave_with_a_floor() {
        let mut inputs = good_inputs();
        inputs.policy_warnings = 2;
        assert_eq!(score(&inputs).policy_compliance, 12);
        inputs.policy_warnings = 10;
        assert_eq!(score(&inputs).policy_compliance, 8);
    }

    #[test]
    fn no_simulation_falls_back_to_canary_credit() {
        let mut inputs = good_inputs();
        inputs.simulation_completed = false;
        assert_eq!(score(&inputs).test_coverage, 12);

        inputs.has_canary = false;
        let quality = score(&inputs);
        assert_eq!(quality.test_coverage, 0);
        // Losing the canary also costs structural points.
        assert_eq!(quality.structural, 16);
    }

    #[test]
    fn partial_simulation_pass_rate() {
        let mut inputs = good_inputs();
        inputs.simulation_pass_rate = Some(0.5);
        assert_eq!(score(&inputs).test_coverage, 15);
    }

    #[test]
    fn no_history_is_neutral() {
        let mut inputs = good_inputs();
        inputs.historical_success_rate = None;
        assert_eq!(score(&inputs).operational_history, 10);
    }

    #[test]
    fn review_tiers() {
        let mut inputs = good_inputs();
        inputs.approvals = 0;
        assert_eq!(score(&inputs).human_review, 0);
        inputs.approvals = 1;
        assert_eq!(score(&inputs).human_review, 12);
        inputs.approvals = 5;
        assert_eq!(score(&inputs).human_review, 20);
    }

    #[test]
    fn unknown_schema_gets_partial_structural_credit() {
        let mut inputs = good_inputs();
        inputs.schema_valid = false;
        inputs.schema_unknown = true;
        assert_eq!(score(&inputs).structural, 16);
    }

    #[test]
    fn destructive_tools_force_approval() {
        let mut inputs = good_inputs();
        inputs.has_destructive_tools = true;
        assert!(score(&inputs).requires_approval);
    }

    #[test]
    fn production_below_bulk_bar_requires_approval() {
        let mut inputs = good_inputs();
        inputs.target = Some(Environment::Production);
        inputs.approvals = 0; // total drops to 79
        let quality = score(&inputs);
        assert!(quality.total() < 90);
        assert!(quality.requires_approval);

        inputs.approvals = 2; // back to 99
        assert!(!score(&inputs).requires_approval);
    }
}
