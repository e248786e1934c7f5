//! File-backed inputs for the daemon.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use strata_core::{Blueprint, Workload};
use strata_metrics::{MetricSample, MetricsSource};
use strata_planner::WorkloadProvider;

/// Re-reads a JSON workload file on every planning run, so an external
/// forecaster can replace it between runs.
pub struct FileWorkloadProvider {
    path: PathBuf,
}

impl FileWorkloadProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WorkloadProvider for FileWorkloadProvider {
    async fn next_workload(&self, schema: &str) -> anyhow::Result<Workload> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            anyhow::anyhow!("failed to read workload {}: {e}", self.path.display())
        })?;
        let workload: Workload = serde_json::from_slice(&bytes)?;
        debug!(
            schema,
            path = ?self.path,
            templates = workload.templates.len(),
            "workload loaded"
        );
        Ok(workload)
    }
}

/// Tails a JSON array of metric samples that a collector rewrites in
/// place. Each poll returns only samples newer than the newest one seen
/// so far. A missing file means the collector has not written yet.
pub struct FileMetricsProvider {
    path: PathBuf,
    newest: Mutex<Option<DateTime<Utc>>>,
}

impl FileMetricsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            newest: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MetricsSource for FileMetricsProvider {
    async fn poll(&self) -> anyhow::Result<Vec<MetricSample>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => anyhow::bail!("failed to read metrics {}: {e}", self.path.display()),
        };
        let samples: Vec<MetricSample> = serde_json::from_slice(&bytes)?;

        let mut newest = self.newest.lock().await;
        let seen = *newest;
        let mut fresh: Vec<MetricSample> = samples
            .into_iter()
            .filter(|s| seen.is_none_or(|seen| s.at > seen))
            .collect();
        fresh.sort_by_key(|s| s.at);
        if let Some(last) = fresh.last() {
            *newest = Some(last.at);
        }
        debug!(path = ?self.path, fresh = fresh.len(), "metrics polled");
        Ok(fresh)
    }
}

/// Read a blueprint JSON document and validate it.
pub fn load_blueprint(path: &Path) -> anyhow::Result<Blueprint> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("failed to read blueprint {}: {e}", path.display()))?;
    let blueprint = Blueprint::from_json(&bytes)?;
    blueprint.validate()?;
    Ok(blueprint)
}

#[cfg(test)]
mod tests {
    use strata_core::{QueryRep, QueryTemplate};

    use super::*;

    #[tokio::test]
    async fn reads_workload_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workload.json");
        let provider = FileWorkloadProvider::new(&path);
        assert!(provider.next_workload("shop").await.is_err());

        let workload = Workload {
            templates: vec![QueryTemplate::new(QueryRep::read_only("q", &["orders"]), 5.0)],
            ..Workload::default()
        };
        std::fs::write(&path, serde_json::to_vec(&workload).unwrap()).unwrap();
        assert_eq!(provider.next_workload("shop").await.unwrap(), workload);
    }

    #[tokio::test]
    async fn metrics_poll_returns_only_new_samples() {
        use strata_core::Engine;
        use strata_metrics::Metric;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let provider = FileMetricsProvider::new(&path);
        assert!(provider.poll().await.unwrap().is_empty());

        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let sample = |secs: i64, value: f64| MetricSample {
            metric: Metric::Utilization(Engine::Oltp),
            at: t0 + chrono::Duration::seconds(secs),
            value,
        };
        let first = vec![sample(0, 10.0), sample(60, 11.0)];
        std::fs::write(&path, serde_json::to_vec(&first).unwrap()).unwrap();
        assert_eq!(provider.poll().await.unwrap(), first);
        assert!(provider.poll().await.unwrap().is_empty());

        // The collector rewrites the file with one more epoch.
        let second = vec![sample(0, 10.0), sample(60, 11.0), sample(120, 12.0)];
        std::fs::write(&path, serde_json::to_vec(&second).unwrap()).unwrap();
        assert_eq!(provider.poll().await.unwrap(), vec![sample(120, 12.0)]);

        std::fs::write(&path, b"not json").unwrap();
        assert!(provider.poll().await.is_err());
    }

    #[test]
    fn rejects_malformed_blueprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bp.json");
        std::fs::write(&path, b"{\"schema_name\": 3}").unwrap();
        assert!(load_blueprint(&path).is_err());
    }
}
