//! Baseline-vs-cohort metric comparison over the dwell window.
//!
//! Verdicts: all checks within threshold → `passing`; any breach →
//! `failing` (recording which); query errors, data coverage under the
//! configured fraction, or an unusable baseline → `inconclusive`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::provider::{MetricQuery, MetricsProvider};
use crate::template::{CanaryTemplate, CompareOp};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Verdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passing,
    Failing,
    Inconclusive,
}

/// One check's evaluation, kept for the audit trail and operator UI.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEvaluation {
    pub metric: String,
    pub op: CompareOp,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_value: Option<f64>,
    pub breached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub verdict: Verdict,
    pub template: String,
    pub evaluations: Vec<MetricEvaluation>,
}

impl AnalysisReport {
    /// Metrics that breached, for the failing-verdict narrative.
    pub fn breached_metrics(&self) -> Vec<&str> {
        self.evaluations
            .iter()
            .filter(|e| e.breached)
            .map(|e| e.metric.as_str())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analyzer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CanaryAnalyzer {
    provider: Arc<dyn MetricsProvider>,
    /// Data coverage below this fraction renders a check inconclusive.
    coverage_threshold: f64,
}

impl CanaryAnalyzer {
    pub fn new(provider: Arc<dyn MetricsProvider>, coverage_threshold: f64) -> Self {
        Self {
            provider,
            coverage_threshold: coverage_threshold.clamp(0.0, 1.0),
        }
    }

    pub async fn analyze(
        &self,
        template: &CanaryTemplate,
        cohort: &[String],
        baseline: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AnalysisReport {
        let mut evaluations = Vec::with_capacity(template.checks.len());
        let mut any_breach = false;
        let mut any_inconclusive = false;

        for check in &template.checks {
            let evaluation = self
                .evaluate_check(check, cohort, baseline, from, to)
                .await;
            match &evaluation {
                Ok(eval) => {
                    any_breach |= eval.breached;
                    evaluations.push(eval.clone());
                }
                Err(note) => {
                    any_inconclusive = true;
                    evaluations.push(MetricEvaluation {
                        metric: check.metric.clone(),
                        op: check.op,
                        threshold: check.threshold,
                        cohort_value: None,
                        baseline_value: None,
                        breached: false,
                        note: Some(note.clone()),
                    });
                }
            }
        }

        let verdict = if any_breach {
            Verdict::Failing
        } else if any_inconclusive {
            Verdict::Inconclusive
        } else {
            Verdict::Passing
        };

        tracing::info!(
            template = %template.name,
            ?verdict,
            checks = evaluations.len(),
            "canary analysis complete"
        );

        AnalysisReport {
            verdict,
            template: template.name.clone(),
            evaluations,
        }
    }

    /// Ok(eval) for a usable comparison (note set for soft issues);
    /// Err(reason) when the check cannot produce a verdict at all.
    async fn evaluate_check(
        &self,
        check: &crate::template::MetricCheck,
        cohort: &[String],
        baseline: &[String],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> std::result::Result<MetricEvaluation, String> {
        let cohort_series = self
            .provider
            .query(&MetricQuery {
                metric: check.metric.clone(),
                assets: cohort.to_vec(),
                from,
                to,
            })
            .await
            .map_err(|e| format!("{}: cohort query failed: {e}", check.metric))?;

        if cohort_series.coverage() < self.coverage_threshold {
            return Err(format!(
                "{}: cohort coverage {:.0}% below {:.0}%",
                check.metric,
                cohort_series.coverage() * 100.0,
                self.coverage_threshold * 100.0
            ));
        }
        let cohort_value = cohort_series
            .mean()
            .ok_or_else(|| format!("{}: no cohort data points", check.metric))?;

        let (breached, baseline_value) = match check.op {
            CompareOp::LessThan => (cohort_value >= check.threshold, None),
            CompareOp::GreaterThan => (cohort_value <= check.threshold, None),
            CompareOp::WithinPercent => {
                let baseline_series = self
                    .provider
                    .query(&MetricQuery {
                        metric: check.metric.clone(),
                        assets: baseline.to_vec(),
                        from,
                        to,
                    })
                    .await
                    .map_err(|e| format!("{}: baseline query failed: {e}", check.metric))?;
                let baseline_value = baseline_series
                    .mean()
                    .ok_or_else(|| format!("{}: no baseline data points", check.metric))?;
                if baseline_value == 0.0 {
                    return Err(format!("{}: baseline is zero, ratio undefined", check.metric));
                }
                let deviation_pct =
                    ((cohort_value - baseline_value) / baseline_value).abs() * 100.0;
                (deviation_pct > check.threshold, Some(baseline_value))
            }
        };

        Ok(MetricEvaluation {
            metric: check.metric.clone(),
            op: check.op,
            threshold: check.threshold,
            cohort_value: Some(cohort_value),
            baseline_value,
            breached,
            note: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::template::builtin;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let to = Utc::now();
        (to - chrono::Duration::minutes(10), to)
    }

    fn cohort() -> Vec<String> {
        vec!["canary-1".into()]
    }

    fn baseline() -> Vec<String> {
        vec!["base-1".into()]
    }

    fn seed_healthy(provider: &StaticProvider) {
        provider.set("error_rate", "canary-1", vec![0.001, 0.002, 0.001]);
        provider.set("p99_latency_ms", "canary-1", vec![105.0, 102.0, 99.0]);
        provider.set("p99_latency_ms", "base-1", vec![100.0, 101.0, 98.0]);
        provider.set("cpu_percent", "canary-1", vec![40.0, 42.0, 41.0]);
    }

    #[tokio::test]
    async fn healthy_cohort_passes() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Passing);
        assert!(report.breached_metrics().is_empty());
        assert_eq!(report.evaluations.len(), 3);
    }

    #[tokio::test]
    async fn error_rate_breach_fails_and_names_the_metric() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        // Observed 0.035 against a 0.01 threshold.
        provider.set("error_rate", "canary-1", vec![0.035, 0.035, 0.035]);
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Failing);
        assert_eq!(report.breached_metrics(), vec!["error_rate"]);
    }

    #[tokio::test]
    async fn latency_regression_beyond_percent_fails() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        // 30% above baseline against a 20% allowance.
        provider.set("p99_latency_ms", "canary-1", vec![130.0, 130.0, 130.0]);
        provider.set("p99_latency_ms", "base-1", vec![100.0, 100.0, 100.0]);
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Failing);
        assert!(report.breached_metrics().contains(&"p99_latency_ms"));
    }

    #[tokio::test]
    async fn query_error_is_inconclusive() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        provider.fail_metric("cpu_percent");
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Inconclusive);
        let cpu = report.evaluations.iter().find(|e| e.metric == "cpu_percent").unwrap();
        assert!(cpu.note.as_deref().unwrap().contains("query failed"));
    }

    #[tokio::test]
    async fn missing_data_is_inconclusive() {
        let provider = Arc::new(StaticProvider::new());
        // Only error_rate present; the rest have no data at all.
        provider.set("error_rate", "canary-1", vec![0.001]);
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Inconclusive);
    }

    #[tokio::test]
    async fn breach_outranks_inconclusive() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        provider.set("error_rate", "canary-1", vec![0.5, 0.5, 0.5]);
        provider.fail_metric("cpu_percent");
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Failing);
    }

    #[tokio::test]
    async fn zero_baseline_is_inconclusive() {
        let provider = Arc::new(StaticProvider::new());
        seed_healthy(&provider);
        provider.set("p99_latency_ms", "base-1", vec![0.0, 0.0, 0.0]);
        let analyzer = CanaryAnalyzer::new(provider, 0.8);
        let (from, to) = window();

        let report = analyzer
            .analyze(&builtin("standard").unwrap(), &cohort(), &baseline(), from, to)
            .await;
        assert_eq!(report.verdict, Verdict::Inconclusive);
    }

    #[tokio::test]
    async fn greater_than_check() {
        let provider = Arc::new(StaticProvider::new());
        let template = CanaryTemplate {
            name: "uptime".into(),
            checks: vec![crate::template::MetricCheck::new(
                "success_rate",
                CompareOp::GreaterThan,
                0.99,
            )],
        };
        provider.set("success_rate", "canary-1", vec![0.995, 0.999]);
        let analyzer = CanaryAnalyzer::new(provider.clone(), 0.8);
        let (from, to) = window();

        let report = analyzer.analyze(&template, &cohort(), &baseline(), from, to).await;
        assert_eq!(report.verdict, Verdict::Passing);

        provider.set("success_rate", "canary-1", vec![0.90, 0.91]);
        let report = analyzer.analyze(&template, &cohort(), &baseline(), from, to).await;
        assert_eq!(report.verdict, Verdict::Failing);
    }
}
