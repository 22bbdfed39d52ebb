//! The autonomy decision: given a task's risk, quality, and the org's
//! autonomy policy, decide `auto-approve`, `require-approval`, or
//! `block`. Also the batch-size recommendation used as the default phase
//! shape when a plan does not specify one.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use rf_domain::autonomy::{AutonomyConfig, AutonomyDecision, AutonomyMode};
use rf_domain::plan::BatchRule;
use rf_domain::score::{QualityScore, RiskLevel};
use rf_domain::task::Environment;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the decision function reads. `now` is the only clock
/// input; it is bucketed to the org-local hour internally.
#[derive(Debug, Clone)]
pub struct AutonomyInput<'a> {
    pub config: &'a AutonomyConfig,
    pub risk: RiskLevel,
    pub quality: &'a QualityScore,
    pub plan_has_canary: bool,
    /// Environments the plan targets.
    pub target_envs: &'a [Environment],
    /// True while deciding promotion of the canary phase itself.
    pub current_phase_is_canary: bool,
    pub now: DateTime<Utc>,
}

/// Decide the autonomy outcome for a task.
pub fn decide(input: &AutonomyInput<'_>) -> AutonomyDecision {
    // Quality barring any target environment upgrades the outcome to
    // Block regardless of mode.
    if input
        .target_envs
        .iter()
        .any(|env| !input.quality.admits(*env))
    {
        return AutonomyDecision::Block;
    }

    let config = input.config;
    match config.mode {
        AutonomyMode::PlanOnly | AutonomyMode::ApproveAll => AutonomyDecision::RequireApproval,

        AutonomyMode::CanaryOnly => {
            if input.current_phase_is_canary {
                AutonomyDecision::AutoApprove
            } else {
                AutonomyDecision::RequireApproval
            }
        }

        AutonomyMode::RiskBased => {
            let within_risk = input.risk <= config.max_auto_risk;
            let within_hours = config.allowed_hours.contains(local_hour(config, input.now));
            let env_allowed = !config.excludes(input.target_envs);
            if within_risk && within_hours && env_allowed {
                AutonomyDecision::AutoApprove
            } else {
                AutonomyDecision::RequireApproval
            }
        }

        AutonomyMode::FullAuto => {
            let canary_missing = config.require_canary && !input.plan_has_canary;
            let env_excluded = config.excludes(input.target_envs);
            let outside_hours = !config.allowed_hours.contains(local_hour(config, input.now));
            if canary_missing || env_excluded || outside_hours {
                AutonomyDecision::RequireApproval
            } else {
                AutonomyDecision::AutoApprove
            }
        }
    }
}

/// Bucket `now` into the org-local clock hour. Unparseable timezones
/// fall back to UTC (config validation flags them at startup).
fn local_hour(config: &AutonomyConfig, now: DateTime<Utc>) -> u8 {
    use chrono::Timelike;
    match config.timezone.parse::<Tz>() {
        Ok(tz) => now.with_timezone(&tz).hour() as u8,
        Err(_) => now.hour() as u8,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch-size recommendation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default phase shape per risk level: (batch rule, dwell minutes).
pub fn recommend_batch(level: RiskLevel) -> (BatchRule, u64) {
    match level {
        RiskLevel::Low => (BatchRule::Percent { pct: 25 }, 5),
        RiskLevel::Medium => (BatchRule::Percent { pct: 10 }, 10),
        RiskLevel::High => (BatchRule::Percent { pct: 5 }, 15),
        RiskLevel::Critical => (BatchRule::Count { count: 1 }, 30),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rf_domain::task::HoursWindow;

    fn quality(total_target: u8) -> QualityScore {
        let mut dims = [0u8; 5];
        let mut remaining = total_target;
        for d in dims.iter_mut() {
            let take = remaining.min(20);
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

    fn config(mode: AutonomyMode) -> AutonomyConfig {
        AutonomyConfig {
            mode,
            max_auto_risk: RiskLevel::Medium,
            require_canary: true,
            allowed_hours: HoursWindow::ALL_DAY,
            timezone: "UTC".into(),
            excluded_environments: Vec::new(),
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
    }

    fn input<'a>(
        config: &'a AutonomyConfig,
        risk: RiskLevel,
        quality: &'a QualityScore,
        envs: &'a [Environment],
    ) -> AutonomyInput<'a> {
        AutonomyInput {
            config,
            risk,
            quality,
            plan_has_canary: true,
            target_envs: envs,
            current_phase_is_canary: false,
            now: noon(),
        }
    }

    #[test]
    fn plan_only_and_approve_all_always_require_approval() {
        let q = quality(90);
        for mode in [AutonomyMode::PlanOnly, AutonomyMode::ApproveAll] {
            let cfg = config(mode);
            let decision = decide(&input(&cfg, RiskLevel::Low, &q, &[Environment::Dev]));
            assert_eq!(decision, AutonomyDecision::RequireApproval);
        }
    }

    #[test]
    fn canary_only_approves_canary_phase_only() {
        let cfg = config(AutonomyMode::CanaryOnly);
        let q = quality(90);
        let mut i = input(&cfg, RiskLevel::High, &q, &[Environment::Staging]);
        i.current_phase_is_canary = true;
        assert_eq!(decide(&i), AutonomyDecision::AutoApprove);
        i.current_phase_is_canary = false;
        assert_eq!(decide(&i), AutonomyDecision::RequireApproval);
    }

    #[test]
    fn risk_based_approves_under_ceiling() {
        let cfg = config(AutonomyMode::RiskBased);
        let q = quality(82);
        let envs = [Environment::Staging];
        assert_eq!(
            decide(&input(&cfg, RiskLevel::Medium, &q, &envs)),
            AutonomyDecision::AutoApprove
        );
        assert_eq!(
            decide(&input(&cfg, RiskLevel::High, &q, &envs)),
            AutonomyDecision::RequireApproval
        );
        assert_eq!(
            decide(&input(&cfg, RiskLevel::Critical, &q, &envs)),
            AutonomyDecision::RequireApproval
        );
    }

    #[test]
    fn risk_based_respects_allowed_hours() {
        let mut cfg = config(AutonomyMode::RiskBased);
        cfg.allowed_hours = HoursWindow { start_hour: 22, end_hour: 6 };
        let q = quality(82);
        // Noon UTC is outside the overnight window.
        assert_eq!(
            decide(&input(&cfg, RiskLevel::Low, &q, &[Environment::Staging])),
            AutonomyDecision::RequireApproval
        );
    }

    #[test]
    fn risk_based_respects_org_timezone() {
        let mut cfg = config(AutonomyMode::RiskBased);
        cfg.allowed_hours = HoursWindow { start_hour: 22, end_hour: 6 };
        // Noon UTC is 04:00 in Honolulu, inside the overnight window.
        cfg.timezone = "Pacific/Honolulu".into();
        let q = quality(82);
        assert_eq!(
            decide(&input(&cfg, RiskLevel::Low, &q, &[Environment::Staging])),
            AutonomyDecision::AutoApprove
        );
    }

    #[test]
    fn risk_based_respects_excluded_environments() {
        let mut cfg = config(AutonomyMode::RiskBased);
        cfg.excluded_environments = vec![Environment::Production];
        let q = quality(90);
        assert_eq!(
            decide(&input(&cfg, RiskLevel::Low, &q, &[Environment::Production])),
            AutonomyDecision::RequireApproval
        );
        // Any excluded target env in a multi-env plan excludes the plan.
        assert_eq!(
            decide(&input(
                &cfg,
                RiskLevel::Low,
                &q,
                &[Environment::Staging, Environment::Production]
            )),
            AutonomyDecision::RequireApproval
        );
    }

    #[test]
    fn full_auto_guardrails() {
        let cfg = config(AutonomyMode::FullAuto);
        let q = quality(90);
        let envs = [Environment::Staging];

        assert_eq!(
            decide(&input(&cfg, RiskLevel::Critical, &q, &envs)),
            AutonomyDecision::AutoApprove
        );

        // Missing canary with require_canary set drops to approval.
        let mut no_canary = input(&cfg, RiskLevel::Low, &q, &envs);
        no_canary.plan_has_canary = false;
        assert_eq!(decide(&no_canary), AutonomyDecision::RequireApproval);

        // require_canary = false restores auto-approve.
        let mut relaxed = config(AutonomyMode::FullAuto);
        relaxed.require_canary = false;
        let mut i = input(&relaxed, RiskLevel::Low, &q, &envs);
        i.plan_has_canary = false;
        assert_eq!(decide(&i), AutonomyDecision::AutoApprove);
    }

    #[test]
    fn quality_bar_blocks_every_mode() {
        let q = quality(55); // below the production threshold
        for mode in [
            AutonomyMode::PlanOnly,
            AutonomyMode::ApproveAll,
            AutonomyMode::CanaryOnly,
            AutonomyMode::RiskBased,
            AutonomyMode::FullAuto,
        ] {
            let cfg = config(mode);
            assert_eq!(
                decide(&input(&cfg, RiskLevel::Low, &q, &[Environment::Production])),
                AutonomyDecision::Block,
                "mode {mode:?}"
            );
        }
    }

    #[test]
    fn batch_recommendation_table() {
        assert_eq!(
            recommend_batch(RiskLevel::Low),
            (BatchRule::Percent { pct: 25 }, 5)
        );
        assert_eq!(
            recommend_batch(RiskLevel::Medium),
            (BatchRule::Percent { pct: 10 }, 10)
        );
        assert_eq!(
            recommend_batch(RiskLevel::High),
            (BatchRule::Percent { pct: 5 }, 15)
        );
        assert_eq!(
            recommend_batch(RiskLevel::Critical),
            (BatchRule::Count { count: 1 }, 30)
        );
    }
}
