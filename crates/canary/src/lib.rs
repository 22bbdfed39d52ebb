//! Canary analysis: metric templates, pluggable metric providers, and
//! the baseline-vs-cohort analyzer that decides promotion or rollback.

pub mod analyzer;
pub mod provider;
pub mod template;

pub use analyzer::{AnalysisReport, CanaryAnalyzer, MetricEvaluation, Verdict};
pub use provider::{MetricQuery, MetricSeries, MetricsProvider, PrometheusProvider, StaticProvider};
pub use template::{builtin, CanaryTemplate, CompareOp, MetricCheck};
