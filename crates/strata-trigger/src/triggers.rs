//! Replan predicates.
//!
//! Each trigger owns whatever state it needs between ticks and is told
//! about every completed planning run through `on_replan`. Metric-driven
//! triggers stay quiet for an observe delay after each run and then only
//! read samples recorded after it, so a breach under the old blueprint
//! cannot fire again against the new one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use strata_core::{Blueprint, Engine, Provisioning, Score};
use strata_metrics::{Metric, Monitor};

use crate::forecast::{Forecaster, MetricsThresholds, tail};

#[async_trait]
pub trait Trigger: Send + Sync {
    fn name(&self) -> &str;

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool>;

    /// A planning run finished against `blueprint`. `score` is the
    /// predicted score of the blueprint now in effect, when known.
    fn on_replan(&mut self, _now: DateTime<Utc>, _blueprint: &Blueprint, _score: Option<&Score>) {}
}

// ── Observe cutoff ─────────────────────────────────────────────────

/// The instant of the last planning run and how long to wait after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserveCutoff {
    delay: Duration,
    cutoff: Option<DateTime<Utc>>,
}

impl ObserveCutoff {
    pub fn new(delay_s: u64) -> Self {
        Self {
            delay: Duration::seconds(delay_s as i64),
            cutoff: None,
        }
    }

    /// Whether the delay since the last run has passed. Always true
    /// before the first run.
    pub fn settled(&self, now: DateTime<Utc>) -> bool {
        self.cutoff.is_none_or(|cutoff| now - cutoff >= self.delay)
    }

    /// Samples at or before this instant predate the current blueprint.
    pub fn after(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.cutoff = Some(now);
    }
}

impl Default for ObserveCutoff {
    fn default() -> Self {
        Self::new(0)
    }
}

// ── Elapsed time ───────────────────────────────────────────────────

/// Fires once the last plan is strictly older than `window × multiplier`.
pub struct ElapsedTime {
    period: Duration,
    last_plan: DateTime<Utc>,
}

impl ElapsedTime {
    pub fn new(planning_window_s: u64, multiplier: f64, started: DateTime<Utc>) -> Self {
        let period_ms = (planning_window_s as f64 * multiplier * 1000.0) as i64;
        Self {
            period: Duration::milliseconds(period_ms),
            last_plan: started,
        }
    }
}

#[async_trait]
impl Trigger for ElapsedTime {
    fn name(&self) -> &str {
        "elapsed_time"
    }

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(now - self.last_plan > self.period)
    }

    fn on_replan(&mut self, now: DateTime<Utc>, _blueprint: &Blueprint, _score: Option<&Score>) {
        self.last_plan = now;
    }
}

// ── Resource utilization ───────────────────────────────────────────

/// Sustained over- or under-utilization of one engine.
pub struct ResourceUtilization {
    name: String,
    engine: Engine,
    thresholds: MetricsThresholds,
    cutoff: ObserveCutoff,
    monitor: Arc<dyn Monitor>,
}

impl ResourceUtilization {
    pub fn new(engine: Engine, thresholds: MetricsThresholds, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            name: format!("utilization.{engine}"),
            engine,
            thresholds,
            cutoff: ObserveCutoff::default(),
            monitor,
        }
    }

    pub fn with_observe_delay(mut self, delay_s: u64) -> Self {
        self.cutoff = ObserveCutoff::new(delay_s);
        self
    }
}

#[async_trait]
impl Trigger for ResourceUtilization {
    fn name(&self) -> &str {
        &self.name
    }

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        if !self.cutoff.settled(now) {
            return Ok(false);
        }
        let values = self
            .monitor
            .read_k_most_recent_after(
                Metric::Utilization(self.engine),
                self.cutoff.after(),
                self.thresholds.sustained_epochs,
            )
            .await?;
        Ok(self.thresholds.exceeds_thresholds(&values))
    }

    fn on_replan(&mut self, now: DateTime<Utc>, _blueprint: &Blueprint, _score: Option<&Score>) {
        self.cutoff.reset(now);
    }
}

// ── Variable cost ──────────────────────────────────────────────────

/// Observed scan-billed cost drifting away from the plan's estimate.
pub struct VariableCost {
    threshold_frac: f64,
    planned: Option<f64>,
    cutoff: ObserveCutoff,
    monitor: Arc<dyn Monitor>,
}

impl VariableCost {
    pub fn new(threshold_frac: f64, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            threshold_frac,
            planned: None,
            cutoff: ObserveCutoff::default(),
            monitor,
        }
    }

    pub fn with_observe_delay(mut self, delay_s: u64) -> Self {
        self.cutoff = ObserveCutoff::new(delay_s);
        self
    }
}

#[async_trait]
impl Trigger for VariableCost {
    fn name(&self) -> &str {
        "variable_cost"
    }

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        // Nothing to drift from.
        let Some(planned) = self.planned.filter(|p| *p > 0.0) else {
            return Ok(false);
        };
        if !self.cutoff.settled(now) {
            return Ok(false);
        }
        let observed = self
            .monitor
            .read_k_most_recent_after(Metric::VariableCostPerHour, self.cutoff.after(), 1)
            .await?;
        let Some(&observed) = observed.last() else {
            return Ok(false);
        };
        let drift = (observed - planned).abs() / planned;
        debug!(planned, observed, drift, "variable cost drift");
        Ok(drift > self.threshold_frac)
    }

    fn on_replan(&mut self, now: DateTime<Utc>, _blueprint: &Blueprint, score: Option<&Score>) {
        if let Some(score) = score {
            self.planned = Some(score.variable_cost_per_hour);
        }
        self.cutoff.reset(now);
    }
}

// ── Latency ceilings ───────────────────────────────────────────────

/// A latency series above its ceiling now, or forecast to be soon.
pub struct LatencyCeiling {
    name: &'static str,
    metric: Metric,
    ceiling: f64,
    sustained_epochs: usize,
    lookahead_epochs: usize,
    forecaster: Forecaster,
    history_epochs: usize,
    cutoff: ObserveCutoff,
    monitor: Arc<dyn Monitor>,
}

impl LatencyCeiling {
    /// Query p95 against its ceiling.
    pub fn query_p95(
        ceiling: f64,
        sustained_epochs: usize,
        lookahead_epochs: usize,
        forecaster: Forecaster,
        history_epochs: usize,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            name: "query_latency_ceiling",
            metric: Metric::QueryLatencyP95,
            ceiling,
            sustained_epochs,
            lookahead_epochs,
            forecaster,
            history_epochs,
            cutoff: ObserveCutoff::default(),
            monitor,
        }
    }

    /// Transaction p90 against its ceiling.
    pub fn txn_p90(
        ceiling: f64,
        sustained_epochs: usize,
        lookahead_epochs: usize,
        forecaster: Forecaster,
        history_epochs: usize,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            name: "txn_latency_ceiling",
            metric: Metric::TxnLatencyP90,
            ..Self::query_p95(
                ceiling,
                sustained_epochs,
                lookahead_epochs,
                forecaster,
                history_epochs,
                monitor,
            )
        }
    }

    pub fn with_observe_delay(mut self, delay_s: u64) -> Self {
        self.cutoff = ObserveCutoff::new(delay_s);
        self
    }

    fn above(&self, values: &[f64]) -> bool {
        values.iter().all(|v| *v > self.ceiling)
    }
}

#[async_trait]
impl Trigger for LatencyCeiling {
    fn name(&self) -> &str {
        self.name
    }

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        if !self.cutoff.settled(now) {
            return Ok(false);
        }
        let k = self.history_epochs.max(self.sustained_epochs);
        let history = self
            .monitor
            .read_k_most_recent_after(self.metric, self.cutoff.after(), k)
            .await?;

        // Both checks need a full sustained window under this blueprint.
        let Some(recent) = tail(&history, self.sustained_epochs) else {
            return Ok(false);
        };
        if self.above(recent) {
            debug!(trigger = self.name, ceiling = self.ceiling, "latency above ceiling");
            return Ok(true);
        }

        let forecast = self.forecaster.forecast(&history, self.lookahead_epochs);
        let predicted = forecast
            .windows(self.sustained_epochs)
            .any(|window| self.above(window));
        if predicted {
            debug!(trigger = self.name, ceiling = self.ceiling, "latency forecast above ceiling");
        }
        Ok(predicted)
    }

    fn on_replan(&mut self, now: DateTime<Utc>, _blueprint: &Blueprint, _score: Option<&Score>) {
        self.cutoff.reset(now);
    }
}

// ── Recent change ──────────────────────────────────────────────────

/// Re-evaluate once, one delay window after a provisioning change.
pub struct RecentChange {
    delay: Duration,
    last_provisioning: Option<BTreeMap<Engine, Provisioning>>,
    changed_at: Option<DateTime<Utc>>,
}

impl RecentChange {
    pub fn new(delay_s: u64) -> Self {
        Self {
            delay: Duration::seconds(delay_s as i64),
            last_provisioning: None,
            changed_at: None,
        }
    }
}

#[async_trait]
impl Trigger for RecentChange {
    fn name(&self) -> &str {
        "recent_change"
    }

    async fn should_replan(&mut self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        match self.changed_at {
            Some(at) if now - at >= self.delay => {
                self.changed_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn on_replan(&mut self, now: DateTime<Utc>, blueprint: &Blueprint, _score: Option<&Score>) {
        let provisioning = blueprint.provisioning_map();
        if self
            .last_provisioning
            .as_ref()
            .is_some_and(|last| last != provisioning)
        {
            self.changed_at = Some(now);
        }
        self.last_provisioning = Some(provisioning.clone());
    }
}
