//! Monitor — rolling metric series per engine and per front end.
//!
//! One value per metric per epoch, stamped with the time it was
//! recorded. The collector that feeds the monitor (cloud metrics,
//! front-end latency histograms) lives outside this crate;
//! `InMemoryMonitor` is the series store it records into.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use strata_core::{Engine, PlanningMetrics};

/// A metric tracked by the monitor. Serialized by name, for example
/// `utilization.oltp` or `query_latency_p95`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Metric {
    /// CPU utilization of one engine, in percent.
    Utilization(Engine),
    /// Front-end p95 latency of analytical queries, seconds.
    QueryLatencyP95,
    /// Front-end p90 latency of transactions, seconds.
    TxnLatencyP90,
    /// Observed variable (scan-billed) cost, USD per hour.
    VariableCostPerHour,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Utilization(engine) => write!(f, "utilization.{engine}"),
            Metric::QueryLatencyP95 => f.write_str("query_latency_p95"),
            Metric::TxnLatencyP90 => f.write_str("txn_latency_p90"),
            Metric::VariableCostPerHour => f.write_str("variable_cost_per_hour"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query_latency_p95" => Ok(Metric::QueryLatencyP95),
            "txn_latency_p90" => Ok(Metric::TxnLatencyP90),
            "variable_cost_per_hour" => Ok(Metric::VariableCostPerHour),
            _ => s
                .strip_prefix("utilization.")
                .and_then(|name| Engine::ALL.into_iter().find(|e| e.name() == name))
                .map(Metric::Utilization)
                .ok_or_else(|| format!("unknown metric {s:?}")),
        }
    }
}

impl From<Metric> for String {
    fn from(metric: Metric) -> Self {
        metric.to_string()
    }
}

impl TryFrom<String> for Metric {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One observed value as delivered by a metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: Metric,
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Where the daemon pulls new samples from on every tick.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Samples not returned by an earlier call, oldest first.
    async fn poll(&self) -> anyhow::Result<Vec<MetricSample>>;
}

/// Read access to rolling metric series.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Up to `k` most recent values of `metric` recorded strictly after
    /// `after` (or all of them when `after` is `None`), oldest first.
    async fn read_k_most_recent_after(
        &self,
        metric: Metric,
        after: Option<DateTime<Utc>>,
        k: usize,
    ) -> anyhow::Result<Vec<f64>>;

    /// Up to `k` most recent values of `metric`, oldest first.
    async fn read_k_most_recent(&self, metric: Metric, k: usize) -> anyhow::Result<Vec<f64>> {
        self.read_k_most_recent_after(metric, None, k).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    value: f64,
}

/// Bounded in-memory series store.
#[derive(Clone)]
pub struct InMemoryMonitor {
    series: Arc<RwLock<HashMap<Metric, VecDeque<Sample>>>>,
    capacity: usize,
}

impl InMemoryMonitor {
    /// Keep at most `capacity` epochs per metric.
    pub fn new(capacity: usize) -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Append one epoch's value for a metric, stamped now.
    pub async fn record(&self, metric: Metric, value: f64) {
        self.record_at(metric, Utc::now(), value).await;
    }

    /// Append one epoch's value observed at `at`.
    pub async fn record_at(&self, metric: Metric, at: DateTime<Utc>, value: f64) {
        let mut series = self.series.write().await;
        let values = series.entry(metric).or_default();
        if values.len() == self.capacity {
            values.pop_front();
        }
        values.push_back(Sample { at, value });
        debug!(%metric, value, %at, "metric recorded");
    }

    /// Append a whole series, oldest first, stamped now.
    pub async fn record_all(&self, metric: Metric, values: &[f64]) {
        self.record_all_at(metric, Utc::now(), values).await;
    }

    pub async fn record_all_at(&self, metric: Metric, at: DateTime<Utc>, values: &[f64]) {
        for value in values {
            self.record_at(metric, at, *value).await;
        }
    }

    /// Record collector samples in timestamp order.
    pub async fn ingest(&self, samples: &[MetricSample]) {
        let mut ordered = samples.to_vec();
        ordered.sort_by_key(|s| s.at);
        for sample in ordered {
            self.record_at(sample.metric, sample.at, sample.value).await;
        }
    }

    pub async fn len(&self, metric: Metric) -> usize {
        self.series
            .read()
            .await
            .get(&metric)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

impl Default for InMemoryMonitor {
    fn default() -> Self {
        Self::new(1440)
    }
}

#[async_trait]
impl Monitor for InMemoryMonitor {
    async fn read_k_most_recent_after(
        &self,
        metric: Metric,
        after: Option<DateTime<Utc>>,
        k: usize,
    ) -> anyhow::Result<Vec<f64>> {
        let series = self.series.read().await;
        let Some(samples) = series.get(&metric) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<f64> = samples
            .iter()
            .rev()
            .take_while(|s| after.is_none_or(|cutoff| s.at > cutoff))
            .take(k)
            .map(|s| s.value)
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

/// Latest values the planner needs, zero where no data exists yet.
pub async fn planning_metrics(monitor: &dyn Monitor) -> anyhow::Result<PlanningMetrics> {
    let latest = |values: Vec<f64>| values.last().copied().unwrap_or(0.0);
    Ok(PlanningMetrics {
        query_p95_latency_s: latest(monitor.read_k_most_recent(Metric::QueryLatencyP95, 1).await?),
        txn_p90_latency_s: latest(monitor.read_k_most_recent(Metric::TxnLatencyP90, 1).await?),
        variable_cost_per_hour: latest(
            monitor
                .read_k_most_recent(Metric::VariableCostPerHour, 1)
                .await?,
        ),
    })
}
