//! Risk assessment: derive the eight weighted factors from what is known
//! about a task, then let the domain scoring combine them. Everything
//! here is a pure function of its inputs — the clock enters only as a
//! pre-bucketed hour, so re-evaluation with identical inputs always
//! reproduces the score.

use rf_domain::score::{RiskFactors, RiskScore};
use rf_domain::task::{ActionType, Environment};
use rf_domain::tool::RiskTier;

/// Inputs the assessor derives factors from.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub action: ActionType,
    pub environment: Environment,
    /// Assets the plan's widest phase touches.
    pub asset_count: usize,
    /// Total assets matching the target selector.
    pub fleet_size: usize,
    /// Org-local clock hour (0-23) at evaluation time.
    pub hour: u8,
    /// Failure rate of this action family over the trailing window, 0-1.
    pub historical_failure_rate: f64,
    /// Highest risk tier among the plan's tools.
    pub max_risk_tier: RiskTier,
    /// Downstream systems depending on the targeted assets.
    pub dependency_count: usize,
    /// Target assets carry compliance-scoped tags (PCI, HIPAA, ...).
    pub compliance_scoped: bool,
}

/// Derive the factor vector and compute the final score.
pub fn assess(ctx: &RiskContext) -> RiskScore {
    let factors = RiskFactors {
        criticality: criticality(ctx.environment),
        change_type: change_type(ctx.max_risk_tier),
        blast_radius: blast_radius(ctx.asset_count, ctx.fleet_size),
        time_of_day: time_of_day(ctx.hour),
        historical_failure: (ctx.historical_failure_rate.clamp(0.0, 1.0) * 100.0).round() as u8,
        rollback_complexity: rollback_complexity(ctx.max_risk_tier),
        dependencies: (ctx.dependency_count.min(10) * 10) as u8,
        compliance_impact: compliance_impact(ctx.action, ctx.compliance_scoped),
    };
    RiskScore::compute(factors, ctx.environment)
}

fn criticality(env: Environment) -> u8 {
    match env {
        Environment::Production => 90,
        Environment::Dr => 70,
        Environment::Staging => 50,
        Environment::Dev => 20,
    }
}

fn change_type(tier: RiskTier) -> u8 {
    match tier {
        RiskTier::Read => 5,
        RiskTier::MutateLow => 25,
        RiskTier::MutateMedium => 50,
        RiskTier::MutateHigh => 75,
        RiskTier::Destructive => 100,
    }
}

fn blast_radius(asset_count: usize, fleet_size: usize) -> u8 {
    if fleet_size == 0 {
        return 0;
    }
    let pct = (asset_count as f64 / fleet_size as f64) * 100.0;
    pct.round().clamp(0.0, 100.0) as u8
}

/// Peak-traffic hours carry the most user impact; the overnight window
/// the least.
fn time_of_day(hour: u8) -> u8 {
    match hour {
        9..=16 => 80,
        6..=8 | 17..=21 => 50,
        _ => 20,
    }
}

fn rollback_complexity(tier: RiskTier) -> u8 {
    match tier {
        RiskTier::Read => 0,
        RiskTier::MutateLow => 20,
        RiskTier::MutateMedium => 40,
        RiskTier::MutateHigh => 70,
        RiskTier::Destructive => 100,
    }
}

fn compliance_impact(action: ActionType, scoped: bool) -> u8 {
    if scoped {
        return 85;
    }
    match action {
        ActionType::ComplianceAudit | ActionType::SecurityScan => 40,
        _ => 15,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rf_domain::score::RiskLevel;

    fn ctx() -> RiskContext {
        RiskContext {
            action: ActionType::DriftRemediate,
            environment: Environment::Staging,
            asset_count: 5,
            fleet_size: 100,
            hour: 3,
            historical_failure_rate: 0.05,
            max_risk_tier: RiskTier::MutateMedium,
            dependency_count: 2,
            compliance_scoped: false,
        }
    }

    #[test]
    fn assessment_is_deterministic() {
        let a = assess(&ctx());
        let b = assess(&ctx());
        assert_eq!(a, b);
    }

    #[test]
    fn staging_drift_remediation_is_medium() {
        let score = assess(&ctx());
        assert_eq!(score.level, RiskLevel::Medium, "total={}", score.total);
    }

    #[test]
    fn production_patching_is_critical() {
        let score = assess(&RiskContext {
            action: ActionType::PatchRollout,
            environment: Environment::Production,
            asset_count: 80,
            fleet_size: 100,
            hour: 11,
            historical_failure_rate: 0.3,
            max_risk_tier: RiskTier::MutateHigh,
            dependency_count: 6,
            compliance_scoped: true,
        });
        assert_eq!(score.level, RiskLevel::Critical, "total={}", score.total);
    }

    #[test]
    fn dev_reads_are_low() {
        let score = assess(&RiskContext {
            action: ActionType::ComplianceAudit,
            environment: Environment::Dev,
            asset_count: 1,
            fleet_size: 50,
            hour: 3,
            historical_failure_rate: 0.0,
            max_risk_tier: RiskTier::Read,
            dependency_count: 0,
            compliance_scoped: false,
        });
        assert_eq!(score.level, RiskLevel::Low, "total={}", score.total);
    }

    #[test]
    fn environment_raises_the_same_change() {
        let staging = assess(&ctx());
        let prod = assess(&RiskContext {
            environment: Environment::Production,
            ..ctx()
        });
        assert!(prod.total > staging.total);
    }

    #[test]
    fn blast_radius_scales_with_cohort() {
        let narrow = assess(&ctx());
        let wide = assess(&RiskContext { asset_count: 100, ..ctx() });
        assert!(wide.total > narrow.total);
        assert_eq!(wide.factors.blast_radius, 100);
    }

    #[test]
    fn empty_fleet_has_zero_blast_radius() {
        let score = assess(&RiskContext { fleet_size: 0, asset_count: 0, ..ctx() });
        assert_eq!(score.factors.blast_radius, 0);
    }

    #[test]
    fn business_hours_riskier_than_night() {
        let night = assess(&ctx());
        let midday = assess(&RiskContext { hour: 11, ..ctx() });
        assert!(midday.total > night.total);
    }

    #[test]
    fn dependency_factor_caps_at_100() {
        let score = assess(&RiskContext { dependency_count: 99, ..ctx() });
        assert_eq!(score.factors.dependencies, 100);
    }
}
