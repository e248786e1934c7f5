//! Trigger engine — ORs every configured trigger once per tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use strata_core::{Blueprint, Engine, Score, StrataConfig};
use strata_metrics::Monitor;

use crate::forecast::{Forecaster, MetricsThresholds};
use crate::triggers::{
    ElapsedTime, LatencyCeiling, RecentChange, ResourceUtilization, Trigger, VariableCost,
};

/// Name reported when a replan was requested by hand.
pub const MANUAL_TRIGGER: &str = "manual";

/// Cloneable handle for requesting a replan from outside the loop.
#[derive(Clone, Default)]
pub struct ManualReplan(Arc<AtomicBool>);

impl ManualReplan {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct TriggerEngine {
    triggers: Vec<Box<dyn Trigger>>,
    manual: ManualReplan,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(mut self, trigger: Box<dyn Trigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Every enabled trigger from `[triggers]`, with latency ceilings
    /// taken from `[comparator]`.
    pub fn from_config(config: &StrataConfig, monitor: Arc<dyn Monitor>, now: DateTime<Utc>) -> Self {
        let t = &config.triggers;
        let forecaster = Forecaster::from_kind(t.forecaster, t.forecast_window);
        let mut engine = Self::new();

        if t.elapsed_time.enabled {
            engine = engine.with_trigger(Box::new(ElapsedTime::new(
                t.elapsed_time.planning_window_s,
                t.elapsed_time.multiplier,
                now,
            )));
        }
        if t.utilization.enabled {
            let thresholds = MetricsThresholds::new(
                t.utilization.lo,
                t.utilization.hi,
                t.utilization.sustained_epochs,
            );
            for e in [Engine::Oltp, Engine::Warehouse] {
                engine = engine.with_trigger(Box::new(
                    ResourceUtilization::new(e, thresholds, monitor.clone())
                        .with_observe_delay(t.utilization.observe_delay_s),
                ));
            }
        }
        if t.variable_cost.enabled {
            engine = engine.with_trigger(Box::new(
                VariableCost::new(t.variable_cost.threshold_frac, monitor.clone())
                    .with_observe_delay(t.variable_cost.observe_delay_s),
            ));
        }
        if t.query_latency.enabled {
            engine = engine.with_trigger(Box::new(
                LatencyCeiling::query_p95(
                    config.comparator.query_p95_ceiling_s,
                    t.query_latency.sustained_epochs,
                    t.query_latency.lookahead_epochs,
                    forecaster,
                    t.forecast_window,
                    monitor.clone(),
                )
                .with_observe_delay(t.query_latency.observe_delay_s),
            ));
        }
        if t.txn_latency.enabled {
            engine = engine.with_trigger(Box::new(
                LatencyCeiling::txn_p90(
                    config.comparator.txn_p90_ceiling_s,
                    t.txn_latency.sustained_epochs,
                    t.txn_latency.lookahead_epochs,
                    forecaster,
                    t.forecast_window,
                    monitor.clone(),
                )
                .with_observe_delay(t.txn_latency.observe_delay_s),
            ));
        }
        if t.recent_change.enabled {
            engine = engine.with_trigger(Box::new(RecentChange::new(t.recent_change.delay_s)));
        }
        engine
    }

    pub fn manual_handle(&self) -> ManualReplan {
        self.manual.clone()
    }

    pub fn request_replan(&self) {
        self.manual.request();
    }

    pub fn trigger_names(&self) -> Vec<&str> {
        self.triggers.iter().map(|t| t.name()).collect()
    }

    /// Name of the first trigger that fires, if any.
    ///
    /// A trigger that fails to read its metrics is logged and counted as
    /// not firing.
    pub async fn should_replan(&mut self, now: DateTime<Utc>) -> Option<String> {
        if self.manual.take() {
            info!("manual replan requested");
            return Some(MANUAL_TRIGGER.to_string());
        }
        for trigger in self.triggers.iter_mut() {
            match trigger.should_replan(now).await {
                Ok(true) => {
                    info!(trigger = trigger.name(), "replan triggered");
                    return Some(trigger.name().to_string());
                }
                Ok(false) => {}
                Err(e) => warn!(trigger = trigger.name(), error = %e, "trigger evaluation failed"),
            }
        }
        None
    }

    /// Tell every trigger a planning run finished.
    pub fn notify_replanned(&mut self, now: DateTime<Utc>, blueprint: &Blueprint, score: Option<&Score>) {
        for trigger in self.triggers.iter_mut() {
            trigger.on_replan(now, blueprint, score);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use strata_core::{EngineSet, Provisioning, RoutingPolicySpec, Table};
    use strata_metrics::{InMemoryMonitor, Metric};

    use super::*;

    fn blueprint() -> Blueprint {
        Blueprint::unvalidated(
            "shop",
            vec![Table::new("orders", EngineSet::only(Engine::Oltp))],
            BTreeMap::from([(Engine::Oltp, Provisioning::new("db.r6g.large", 1))]),
            RoutingPolicySpec::default(),
        )
    }

    struct Broken;

    #[async_trait]
    impl Trigger for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn should_replan(&mut self, _now: DateTime<Utc>) -> anyhow::Result<bool> {
            anyhow::bail!("metrics backend unavailable")
        }
    }

    struct Always;

    #[async_trait]
    impl Trigger for Always {
        fn name(&self) -> &str {
            "always"
        }

        async fn should_replan(&mut self, _now: DateTime<Utc>) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn manual_request_fires_once() {
        let mut engine = TriggerEngine::new();
        let handle = engine.manual_handle();
        assert_eq!(engine.should_replan(Utc::now()).await, None);
        handle.request();
        assert_eq!(engine.should_replan(Utc::now()).await.as_deref(), Some(MANUAL_TRIGGER));
        assert_eq!(engine.should_replan(Utc::now()).await, None);
    }

    #[tokio::test]
    async fn failing_trigger_does_not_block_others() {
        let mut engine = TriggerEngine::new()
            .with_trigger(Box::new(Broken))
            .with_trigger(Box::new(Always));
        assert_eq!(engine.should_replan(Utc::now()).await.as_deref(), Some("always"));
    }

    #[tokio::test]
    async fn config_builds_enabled_triggers() {
        let monitor: Arc<dyn Monitor> = Arc::new(InMemoryMonitor::default());
        let mut config = StrataConfig::default();
        let engine = TriggerEngine::from_config(&config, monitor.clone(), Utc::now());
        assert_eq!(
            engine.trigger_names(),
            vec![
                "elapsed_time",
                "utilization.oltp",
                "utilization.warehouse",
                "variable_cost",
                "query_latency_ceiling",
                "txn_latency_ceiling",
                "recent_change",
            ]
        );

        config.triggers.utilization.enabled = false;
        config.triggers.recent_change.enabled = false;
        let engine = TriggerEngine::from_config(&config, monitor, Utc::now());
        assert_eq!(engine.trigger_names().len(), 4);
    }

    #[tokio::test]
    async fn utilization_fires_through_engine() {
        let monitor = InMemoryMonitor::default();
        let mut config = StrataConfig::default();
        config.triggers.elapsed_time.enabled = false;
        let mut engine = TriggerEngine::from_config(&config, Arc::new(monitor.clone()), Utc::now());
        assert_eq!(engine.should_replan(Utc::now()).await, None);

        monitor
            .record_all(Metric::Utilization(Engine::Oltp), &[5.0, 6.0, 7.0])
            .await;
        assert_eq!(
            engine.should_replan(Utc::now()).await.as_deref(),
            Some("utilization.oltp")
        );
    }

    #[tokio::test]
    async fn replan_silences_metric_triggers_until_new_samples() {
        let monitor = InMemoryMonitor::default();
        let mut config = StrataConfig::default();
        config.triggers.elapsed_time.enabled = false;
        config.triggers.recent_change.enabled = false;
        config.triggers.txn_latency.observe_delay_s = 60;
        let start = Utc::now();
        let mut engine = TriggerEngine::from_config(&config, Arc::new(monitor.clone()), start);

        let ceiling = config.comparator.txn_p90_ceiling_s;
        monitor
            .record_all_at(Metric::TxnLatencyP90, start, &[ceiling * 2.0; 3])
            .await;
        assert_eq!(
            engine.should_replan(start).await.as_deref(),
            Some("txn_latency_ceiling")
        );

        let replanned = start + chrono::Duration::seconds(1);
        engine.notify_replanned(replanned, &blueprint(), None);
        assert_eq!(engine.should_replan(replanned + chrono::Duration::seconds(61)).await, None);
    }
}
