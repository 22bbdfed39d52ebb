//! Canary analysis templates: which metrics to compare, how, and
//! against what threshold. Three built-ins (basic, standard,
//! comprehensive) cover the default auto-rollback triggers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Cohort value must stay below the threshold.
    LessThan,
    /// Cohort value must stay above the threshold.
    GreaterThan,
    /// Cohort value must stay within `threshold` percent of baseline.
    WithinPercent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub metric: String,
    pub op: CompareOp,
    pub threshold: f64,
}

impl MetricCheck {
    pub fn new(metric: impl Into<String>, op: CompareOp, threshold: f64) -> Self {
        Self { metric: metric.into(), op, threshold }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryTemplate {
    pub name: String,
    pub checks: Vec<MetricCheck>,
}

/// Resolve a built-in template by name.
pub fn builtin(name: &str) -> Option<CanaryTemplate> {
    let checks = match name {
        "basic" => vec![
            MetricCheck::new("error_rate", CompareOp::LessThan, 0.05),
        ],
        "standard" => vec![
            MetricCheck::new("error_rate", CompareOp::LessThan, 0.01),
            MetricCheck::new("p99_latency_ms", CompareOp::WithinPercent, 20.0),
            MetricCheck::new("cpu_percent", CompareOp::LessThan, 90.0),
        ],
        "comprehensive" => vec![
            MetricCheck::new("error_rate", CompareOp::LessThan, 0.01),
            MetricCheck::new("p50_latency_ms", CompareOp::WithinPercent, 15.0),
            MetricCheck::new("p99_latency_ms", CompareOp::WithinPercent, 20.0),
            MetricCheck::new("cpu_percent", CompareOp::LessThan, 90.0),
            MetricCheck::new("memory_percent", CompareOp::LessThan, 90.0),
            MetricCheck::new("success_rate", CompareOp::GreaterThan, 0.99),
            // Consecutive health-check failures; breach forces rollback.
            MetricCheck::new("health_check_failures", CompareOp::LessThan, 3.0),
        ],
        _ => return None,
    };
    Some(CanaryTemplate { name: name.to_string(), checks })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        assert_eq!(builtin("basic").unwrap().checks.len(), 1);
        assert_eq!(builtin("standard").unwrap().checks.len(), 3);
        assert_eq!(builtin("comprehensive").unwrap().checks.len(), 7);
        assert!(builtin("bespoke").is_none());
    }

    #[test]
    fn standard_covers_default_rollback_triggers() {
        let template = builtin("standard").unwrap();
        let metrics: Vec<&str> = template.checks.iter().map(|c| c.metric.as_str()).collect();
        assert!(metrics.contains(&"error_rate"));
        assert!(metrics.contains(&"p99_latency_ms"));
        assert!(metrics.contains(&"cpu_percent"));
    }
}
