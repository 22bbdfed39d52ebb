//! Pluggable metric sources for canary analysis.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;

use rf_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query / result shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub metric: String,
    /// Asset identifiers the series is averaged over.
    pub assets: Vec<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    /// Averaged data points over the window, oldest first.
    pub points: Vec<f64>,
    /// Points the window should have produced at full coverage.
    pub expected_points: usize,
}

impl MetricSeries {
    /// Fraction of expected data points actually present.
    pub fn coverage(&self) -> f64 {
        if self.expected_points == 0 {
            return 0.0;
        }
        self.points.len() as f64 / self.expected_points as f64
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().sum::<f64>() / self.points.len() as f64)
    }
}

#[async_trait::async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn query(&self, query: &MetricQuery) -> Result<MetricSeries>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prometheus-style HTTP provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const STEP_SECS: i64 = 60;

pub struct PrometheusProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct PromResponse {
    data: PromData,
}

#[derive(Deserialize)]
struct PromData {
    result: Vec<PromSeries>,
}

#[derive(Deserialize)]
struct PromSeries {
    /// `[ [ts, "value"], ... ]`
    values: Vec<(f64, String)>,
}

impl PrometheusProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait::async_trait]
impl MetricsProvider for PrometheusProvider {
    async fn query(&self, query: &MetricQuery) -> Result<MetricSeries> {
        let selector = query.assets.join("|");
        let promql = format!("avg({}{{instance=~\"{selector}\"}})", query.metric);

        let mut request = self
            .client
            .get(format!("{}/api/v1/query_range", self.base_url))
            .query(&[
                ("query", promql.as_str()),
                ("start", &query.from.timestamp().to_string()),
                ("end", &query.to.timestamp().to_string()),
                ("step", &STEP_SECS.to_string()),
            ]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("metrics backend returned {status}")));
        }
        let body: PromResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("malformed metrics response: {e}")))?;

        let points: Vec<f64> = body
            .data
            .result
            .first()
            .map(|s| {
                s.values
                    .iter()
                    .filter_map(|(_, v)| v.parse::<f64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        let window_secs = (query.to - query.from).num_seconds().max(0);
        let expected_points = (window_secs / STEP_SECS).max(1) as usize;

        Ok(MetricSeries { points, expected_points })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Static provider (tests, offline demos)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed per-(metric, asset) samples. Queries average the requested
/// assets' series pointwise, like a real aggregating backend would.
#[derive(Default)]
pub struct StaticProvider {
    series: RwLock<HashMap<(String, String), Vec<f64>>>,
    /// Metrics that simulate a backend query error.
    failing_metrics: RwLock<Vec<String>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metric: &str, asset: &str, points: Vec<f64>) {
        self.series
            .write()
            .insert((metric.to_string(), asset.to_string()), points);
    }

    /// Make queries for `metric` fail with an HTTP error.
    pub fn fail_metric(&self, metric: &str) {
        self.failing_metrics.write().push(metric.to_string());
    }
}

#[async_trait::async_trait]
impl MetricsProvider for StaticProvider {
    async fn query(&self, query: &MetricQuery) -> Result<MetricSeries> {
        if self.failing_metrics.read().iter().any(|m| m == &query.metric) {
            return Err(Error::Http("metrics backend unavailable".into()));
        }

        let series = self.series.read();
        let selected: Vec<&Vec<f64>> = query
            .assets
            .iter()
            .filter_map(|asset| series.get(&(query.metric.clone(), asset.clone())))
            .collect();

        let expected_points = selected.iter().map(|s| s.len()).max().unwrap_or(0);
        let mut points = Vec::with_capacity(expected_points);
        for i in 0..expected_points {
            let at: Vec<f64> = selected.iter().filter_map(|s| s.get(i).copied()).collect();
            if !at.is_empty() {
                points.push(at.iter().sum::<f64>() / at.len() as f64);
            }
        }

        Ok(MetricSeries { points, expected_points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(metric: &str, assets: &[&str]) -> MetricQuery {
        MetricQuery {
            metric: metric.into(),
            assets: assets.iter().map(|s| s.to_string()).collect(),
            from: Utc::now() - chrono::Duration::minutes(10),
            to: Utc::now(),
        }
    }

    #[tokio::test]
    async fn static_provider_averages_assets() {
        let provider = StaticProvider::new();
        provider.set("error_rate", "web-1", vec![0.01, 0.03]);
        provider.set("error_rate", "web-2", vec![0.03, 0.05]);

        let series = provider.query(&query("error_rate", &["web-1", "web-2"])).await.unwrap();
        assert_eq!(series.points, vec![0.02, 0.04]);
        assert_eq!(series.expected_points, 2);
        assert!((series.mean().unwrap() - 0.03).abs() < 1e-9);
        assert!((series.coverage() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_asset_reduces_nothing_but_absent_metric_is_empty() {
        let provider = StaticProvider::new();
        provider.set("error_rate", "web-1", vec![0.01]);
        let series = provider.query(&query("error_rate", &["ghost"])).await.unwrap();
        assert!(series.points.is_empty());
        assert_eq!(series.mean(), None);
        assert_eq!(series.coverage(), 0.0);
    }

    #[tokio::test]
    async fn failing_metric_errors() {
        let provider = StaticProvider::new();
        provider.fail_metric("cpu_percent");
        let err = provider.query(&query("cpu_percent", &["web-1"])).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[test]
    fn series_mean_and_coverage() {
        let series = MetricSeries { points: vec![1.0, 2.0, 3.0], expected_points: 6 };
        assert_eq!(series.mean(), Some(2.0));
        assert!((series.coverage() - 0.5).abs() < 1e-9);
    }
}
