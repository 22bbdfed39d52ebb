use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canary analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    #[serde(default)]
    pub provider: MetricsProviderKind,
    /// Base URL of the metrics backend (Prometheus-style HTTP API).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the metrics API key, if any.
    #[serde(default = "d_metrics_key_env")]
    pub api_key_env: String,
    /// Fraction of expected data points below which a metric query is
    /// treated as inconclusive rather than passing/failing.
    #[serde(default = "d_coverage")]
    pub coverage_threshold: f64,
    /// What to do with an inconclusive verdict.
    #[serde(default)]
    pub on_inconclusive: InconclusivePolicy,
    /// Consecutive health-check failures that trigger auto-rollback.
    #[serde(default = "d_health_failures")]
    pub max_health_check_failures: u32,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            provider: MetricsProviderKind::Static,
            url: None,
            api_key_env: d_metrics_key_env(),
            coverage_threshold: d_coverage(),
            on_inconclusive: InconclusivePolicy::Hold,
            max_health_check_failures: d_health_failures(),
        }
    }
}

fn d_metrics_key_env() -> String {
    "RF_METRICS_API_KEY".into()
}

fn d_coverage() -> f64 {
    0.8
}

fn d_health_failures() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsProviderKind {
    Prometheus,
    /// Fixed in-process samples; tests and offline demos.
    #[default]
    Static,
}

/// Policy for inconclusive canary verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InconclusivePolicy {
    /// Await an explicit force_promote / force_rollback signal.
    #[default]
    Hold,
    /// Dwell once more and re-analyze, then hold.
    RepeatOnce,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CanaryConfig::default();
        assert_eq!(cfg.provider, MetricsProviderKind::Static);
        assert_eq!(cfg.on_inconclusive, InconclusivePolicy::Hold);
        assert!((cfg.coverage_threshold - 0.8).abs() < f64::EPSILON);
    }
}
