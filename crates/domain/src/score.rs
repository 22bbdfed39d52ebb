//! Quality and risk scores attached to plans and tasks.
//!
//! Quality (0-100, five dimensions) gates which environments a plan may
//! touch. Risk (0-100, eight weighted factors times an environment
//! multiplier) drives the autonomy decision. Both are pure values: the
//! computation lives in `rf-validation` and `rf-risk`.

use serde::{Deserialize, Serialize};

use crate::task::Environment;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quality
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Multi-dimensional admissibility score. Each dimension is 0-20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityScore {
    pub structural: u8,
    pub policy_compliance: u8,
    pub test_coverage: u8,
    pub operational_history: u8,
    pub human_review: u8,
    /// Whether production admission additionally needs an approval record.
    pub requires_approval: bool,
}

impl QualityScore {
    pub const DIMENSION_MAX: u8 = 20;

    pub fn total(&self) -> u8 {
        self.structural
            + self.policy_compliance
            + self.test_coverage
            + self.operational_history
            + self.human_review
    }

    /// Environments this score admits the plan to.
    pub fn allowed_environments(&self) -> Vec<Environment> {
        let total = self.total();
        [
            Environment::Dev,
            Environment::Staging,
            Environment::Dr,
            Environment::Production,
        ]
        .into_iter()
        .filter(|env| total >= env.quality_threshold())
        .collect()
    }

    pub fn admits(&self, env: Environment) -> bool {
        self.total() >= env.quality_threshold()
    }

    /// Wide-batch production changes are held to a higher bar.
    pub fn admits_production_bulk(&self) -> bool {
        self.total() >= Environment::PRODUCTION_BULK_THRESHOLD
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Risk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw factor inputs, each 0-100, prior to weighting.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskFactors {
    pub criticality: u8,
    pub change_type: u8,
    pub blast_radius: u8,
    pub time_of_day: u8,
    pub historical_failure: u8,
    pub rollback_complexity: u8,
    pub dependencies: u8,
    pub compliance_impact: u8,
}

impl RiskFactors {
    /// Fixed factor weights, summing to 1.0.
    pub const WEIGHTS: [(f64, &'static str); 8] = [
        (0.20, "criticality"),
        (0.20, "change_type"),
        (0.15, "blast_radius"),
        (0.10, "time_of_day"),
        (0.15, "historical_failure"),
        (0.10, "rollback_complexity"),
        (0.05, "dependencies"),
        (0.05, "compliance_impact"),
    ];

    /// Weighted sum before the environment multiplier, 0.0 - 100.0.
    pub fn weighted(&self) -> f64 {
        let values = [
            self.criticality,
            self.change_type,
            self.blast_radius,
            self.time_of_day,
            self.historical_failure,
            self.rollback_complexity,
            self.dependencies,
            self.compliance_impact,
        ];
        Self::WEIGHTS
            .iter()
            .zip(values)
            .map(|((w, _), v)| w * f64::from(v))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_total(total: u8) -> Self {
        match total {
            0..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// A computed risk score: factors, environment, final 0-100 total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub factors: RiskFactors,
    pub environment: Environment,
    pub total: u8,
    pub level: RiskLevel,
}

impl RiskScore {
    /// Apply the environment multiplier and bucket into a level. Pure:
    /// identical inputs always produce identical scores.
    pub fn compute(factors: RiskFactors, environment: Environment) -> Self {
        let raw = factors.weighted() * environment.risk_multiplier();
        let total = raw.round().clamp(0.0, 100.0) as u8;
        Self {
            factors,
            environment,
            total,
            level: RiskLevel::from_total(total),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(total_target: u8) -> QualityScore {
        // Spread the target across dimensions, filling in order.
        let mut dims = [0u8; 5];
        let mut remaining = total_target;
        for d in dims.iter_mut() {
            let take = remaining.min(QualityScore::DIMENSION_MAX);
            *d = take;
            remaining -= take;
        }
        QualityScore {
            structural: dims[0],
            policy_compliance: dims[1],
            test_coverage: dims[2],
            operational_history: dims[3],
            human_review: dims[4],
            requires_approval: false,
        }
    }

    #[test]
    fn quality_environment_gating() {
        assert_eq!(quality(35).allowed_environments(), vec![]);
        assert_eq!(quality(45).allowed_environments(), vec![Environment::Dev]);
        assert_eq!(
            quality(65).allowed_environments(),
            vec![Environment::Dev, Environment::Staging]
        );
        let prod = quality(82);
        assert!(prod.admits(Environment::Production));
        assert!(prod.admits(Environment::Dr));
        assert!(!prod.admits_production_bulk());
        assert!(quality(92).admits_production_bulk());
    }

    #[test]
    fn risk_weights_sum_to_one() {
        let sum: f64 = RiskFactors::WEIGHTS.iter().map(|(w, _)| w).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn risk_level_buckets() {
        assert_eq!(RiskLevel::from_total(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_total(24), RiskLevel::Low);
        assert_eq!(RiskLevel::from_total(25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_total(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_total(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_total(74), RiskLevel::High);
        assert_eq!(RiskLevel::from_total(75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_total(100), RiskLevel::Critical);
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn risk_compute_is_deterministic() {
        let factors = RiskFactors {
            criticality: 80,
            change_type: 60,
            blast_radius: 40,
            time_of_day: 20,
            historical_failure: 30,
            rollback_complexity: 50,
            dependencies: 10,
            compliance_impact: 70,
        };
        let a = RiskScore::compute(factors, Environment::Production);
        let b = RiskScore::compute(factors, Environment::Production);
        assert_eq!(a, b);
    }

    #[test]
    fn environment_multiplier_scales_total() {
        let factors = RiskFactors {
            criticality: 50,
            change_type: 50,
            blast_radius: 50,
            time_of_day: 50,
            historical_failure: 50,
            rollback_complexity: 50,
            dependencies: 50,
            compliance_impact: 50,
        };
        // weighted = 50 exactly, so totals are multiplier * 50.
        assert_eq!(RiskScore::compute(factors, Environment::Staging).total, 50);
        assert_eq!(RiskScore::compute(factors, Environment::Production).total, 75);
        assert_eq!(RiskScore::compute(factors, Environment::Dev).total, 25);
        assert_eq!(RiskScore::compute(factors, Environment::Dr).total, 60);

        assert_eq!(
            RiskScore::compute(factors, Environment::Production).level,
            RiskLevel::Critical
        );
        assert_eq!(RiskScore::compute(factors, Environment::Dev).level, RiskLevel::Medium);
    }

    #[test]
    fn risk_total_capped_at_100() {
        let factors = RiskFactors {
            criticality: 100,
            change_type: 100,
            blast_radius: 100,
            time_of_day: 100,
            historical_failure: 100,
            rollback_complexity: 100,
            dependencies: 100,
            compliance_impact: 100,
        };
        let score = RiskScore::compute(factors, Environment::Production);
        assert_eq!(score.total, 100);
        assert_eq!(score.level, RiskLevel::Critical);
    }
}
