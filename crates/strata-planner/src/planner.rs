//! Planning runs: snapshot the inputs, search, decide, record.
//!
//! `run_planning` is a pure function of a `PlanningSnapshot`. The async
//! `BlueprintPlanner` wraps it with the external calls (workload,
//! estimator, monitor), persists the run and emits the decision events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use strata_core::{Blueprint, StrataConfig, SystemEventKind, Workload};
use strata_metrics::{Monitor, planning_metrics};
use strata_state::{EventLog, StateStore};

use crate::comparator::Comparator;
use crate::error::{PlannerError, PlannerResult};
use crate::filters::{FilterChain, Watchdog};
use crate::recording::{PlanDecision, PlanningOutcome, PlanningSnapshot, RecordedRun};
use crate::scoring::Scorer;
use crate::search::{Explorer, SearchStrategy};

/// Source of the next planning window's workload.
#[async_trait]
pub trait WorkloadProvider: Send + Sync {
    async fn next_workload(&self, schema: &str) -> anyhow::Result<Workload>;
}

/// Attaches per-engine latency and scan predictions to a workload.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn annotate(&self, workload: &mut Workload) -> anyhow::Result<()>;
}

/// Keeps whatever predictions the workload already carries.
pub struct PassthroughEstimator;

#[async_trait]
impl Estimator for PassthroughEstimator {
    async fn annotate(&self, _workload: &mut Workload) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Search, score and decide for one snapshot.
pub fn run_planning(snapshot: &PlanningSnapshot) -> PlannerResult<PlanningOutcome> {
    let config = &snapshot.config;
    let current = &snapshot.current;
    let workload = &snapshot.workload;

    let scorer = Scorer::new(&config.scoring);
    let comparator = Comparator::from_config(&config.comparator);
    let filters = FilterChain::new(Watchdog::new(config.watchdog.rules.clone()));

    let current_score = scorer.score(current, current, workload);
    let ctx = comparator.context(&current_score, &snapshot.metrics);

    let strategy = SearchStrategy::from_config(&config.planner);
    let mut explorer = Explorer::new(current, workload, &filters, &scorer, &comparator, ctx);
    strategy.search(&mut explorer, current, &config.planner, snapshot.seed)?;
    let exploration = explorer.finish();

    let decision = comparator.decide(
        current,
        exploration.best,
        &ctx,
        config.planner.acceptance_margin,
    );
    Ok(PlanningOutcome {
        current_score,
        explored: exploration.explored,
        vetoes: exploration.vetoes,
        pruned: exploration.pruned,
        decision,
    })
}

/// Re-execute a recorded run and check it reproduces the recorded outcome.
pub fn replay_run(
    store: &StateStore,
    events: Option<&EventLog>,
    schema: &str,
    run_id: &str,
) -> PlannerResult<PlanningOutcome> {
    let run: RecordedRun = store
        .get_run(schema, run_id)?
        .ok_or_else(|| PlannerError::RunNotFound(run_id.to_string()))?;

    let outcome = run_planning(&run.snapshot)?;
    let replayed = outcome.digest()?;
    if replayed != run.outcome_digest {
        warn!(schema, run_id, recorded = %run.outcome_digest, %replayed, "planning replay diverged");
        if let Some(events) = events {
            events.record(
                SystemEventKind::ReplayDivergence,
                format!("run {run_id}: recorded {}, replayed {replayed}", run.outcome_digest),
            );
        }
        return Err(PlannerError::ReplayDivergence {
            run_id: run_id.to_string(),
            recorded: run.outcome_digest,
            replayed,
        });
    }
    debug!(schema, run_id, digest = %replayed, "planning replay matched");
    Ok(outcome)
}

pub struct BlueprintPlanner {
    config: Arc<StrataConfig>,
    store: StateStore,
    events: EventLog,
    monitor: Arc<dyn Monitor>,
    workloads: Arc<dyn WorkloadProvider>,
    estimator: Arc<dyn Estimator>,
    runs: AtomicU64,
}

impl BlueprintPlanner {
    pub fn new(
        config: Arc<StrataConfig>,
        store: StateStore,
        events: EventLog,
        monitor: Arc<dyn Monitor>,
        workloads: Arc<dyn WorkloadProvider>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            monitor,
            workloads,
            estimator: Arc::new(PassthroughEstimator),
            runs: AtomicU64::new(0),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn Estimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Gather the inputs of a run against `current`.
    pub async fn snapshot(&self, current: &Blueprint, seed: u64) -> PlannerResult<PlanningSnapshot> {
        let schema = current.schema_name();
        let mut workload = self.workloads.next_workload(schema).await?;
        self.estimator.annotate(&mut workload).await?;
        let metrics = planning_metrics(self.monitor.as_ref()).await?;
        Ok(PlanningSnapshot {
            schema_name: schema.to_string(),
            current: current.clone(),
            workload,
            metrics,
            config: (*self.config).clone(),
            seed,
        })
    }

    /// Plan against `current`, record the run and emit the decision.
    pub async fn plan(&self, current: &Blueprint) -> PlannerResult<RecordedRun> {
        let now = Utc::now();
        let seq = self.runs.fetch_add(1, Ordering::Relaxed);
        let run_id = format!("{}-{seq:04}", now.format("%Y%m%dT%H%M%S%.6fZ"));
        let seed = self.config.planner.seed ^ now.timestamp_micros().unsigned_abs();

        let snapshot = self.snapshot(current, seed).await?;
        let started = Instant::now();
        let outcome = run_planning(&snapshot)?;
        let outcome_digest = outcome.digest()?;
        info!(
            schema = %snapshot.schema_name,
            %run_id,
            explored = outcome.explored.len(),
            pruned = outcome.pruned,
            vetoed = outcome.vetoes.len(),
            accepted = outcome.accepted().is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "planning run finished"
        );

        let run = RecordedRun {
            run_id: run_id.clone(),
            recorded_at: now,
            snapshot,
            outcome,
            outcome_digest,
        };
        self.store.put_run(&run.snapshot.schema_name, &run_id, &run)?;

        for veto in &run.outcome.vetoes {
            self.events.record(
                SystemEventKind::WatchdogVeto,
                format!("run {run_id}: candidate {}: {}", short(&veto.digest), veto.reason),
            );
        }
        match &run.outcome.decision {
            PlanDecision::Accepted { rationale, .. } => self
                .events
                .record(SystemEventKind::PlanAccepted, format!("run {run_id}: {rationale}")),
            PlanDecision::Skipped { rationale } => self
                .events
                .record(SystemEventKind::PlanSkipped, format!("run {run_id}: {rationale}")),
        }
        Ok(run)
    }

    pub fn replay(&self, schema: &str, run_id: &str) -> PlannerResult<PlanningOutcome> {
        replay_run(&self.store, Some(&self.events), schema, run_id)
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }
}

fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use strata_core::config::{SearchStrategyKind, WatchdogRule};
    use strata_core::{
        Engine, EngineSet, PlanningMetrics, Provisioning, QueryRep, QueryTemplate,
        RoutingPolicySpec, Table,
    };
    use strata_metrics::InMemoryMonitor;

    use super::*;

    struct FixedWorkload(Workload);

    #[async_trait]
    impl WorkloadProvider for FixedWorkload {
        async fn next_workload(&self, _schema: &str) -> anyhow::Result<Workload> {
            Ok(self.0.clone())
        }
    }

    struct ScanEstimator;

    #[async_trait]
    impl Estimator for ScanEstimator {
        async fn annotate(&self, workload: &mut Workload) -> anyhow::Result<()> {
            for template in &mut workload.templates {
                template.predicted_scan_mb.insert(Engine::Serverless, 10.0);
            }
            Ok(())
        }
    }

    /// `orders` sits on OLTP and a one-node warehouse that serves nothing
    /// OLTP could not serve.
    fn oversized() -> Blueprint {
        Blueprint::new(
            "shop",
            vec![
                Table::new("orders", EngineSet::from(vec![Engine::Oltp, Engine::Warehouse]))
                    .transactional(),
            ],
            BTreeMap::from([
                (Engine::Oltp, Provisioning::new("db.r6g.large", 1)),
                (Engine::Warehouse, Provisioning::new("dc2.large", 1)),
                (Engine::Serverless, Provisioning::serverless()),
            ]),
            RoutingPolicySpec::default(),
        )
        .unwrap()
    }

    fn workload() -> Workload {
        Workload {
            templates: vec![
                QueryTemplate::new(QueryRep::read_only("lookup", &["orders"]), 60.0)
                    .with_latency(Engine::Oltp, 1.0)
                    .with_latency(Engine::Warehouse, 1.0),
            ],
            txn_arrivals_per_s: 5.0,
            txn_service_time_s: 0.005,
            table_sizes_mb: BTreeMap::from([("orders".to_string(), 200.0)]),
        }
    }

    fn config(strategy: SearchStrategyKind) -> StrataConfig {
        let mut config = StrataConfig::default();
        config.planner.strategy = strategy;
        config.planner.max_table_moves = 1;
        config.planner.max_provisioning_steps = 1;
        config
    }

    fn snapshot(config: StrataConfig) -> PlanningSnapshot {
        PlanningSnapshot {
            schema_name: "shop".into(),
            current: oversized(),
            workload: workload(),
            metrics: PlanningMetrics::default(),
            config,
            seed: 9,
        }
    }

    fn planner(store: StateStore, events: EventLog) -> BlueprintPlanner {
        BlueprintPlanner::new(
            Arc::new(config(SearchStrategyKind::Neighborhood)),
            store,
            events,
            Arc::new(InMemoryMonitor::default()),
            Arc::new(FixedWorkload(workload())),
        )
    }

    #[test]
    fn cheaper_feasible_blueprint_is_accepted() {
        let current = oversized();
        for strategy in [SearchStrategyKind::Neighborhood, SearchStrategyKind::Beam] {
            let outcome = run_planning(&snapshot(config(strategy))).unwrap();
            let PlanDecision::Accepted { blueprint, score, .. } = &outcome.decision else {
                panic!("expected acceptance, got {:?}", outcome.decision);
            };
            assert!(score.hourly_cost() < outcome.current_score.hourly_cost());
            assert!(score.query_p95_latency_s <= 30.0);
            assert!(!blueprint.engine_has_capacity(Engine::Warehouse));
            assert!(
                !blueprint
                    .table_locations("orders")
                    .unwrap()
                    .contains(Engine::Warehouse)
            );
            assert!(blueprint.validate().is_ok());
            assert_eq!(outcome.current_score.hourly_cost(), current.provisioning_cost());
        }
    }

    #[test]
    fn margin_blocks_small_gains() {
        let mut config = config(SearchStrategyKind::Neighborhood);
        config.planner.acceptance_margin = 0.9;
        let outcome = run_planning(&snapshot(config)).unwrap();
        assert!(outcome.accepted().is_none());
        assert!(!outcome.explored.is_empty());
    }

    #[test]
    fn watchdog_anchor_keeps_the_warehouse() {
        let mut config = config(SearchStrategyKind::Neighborhood);
        config.watchdog.rules = vec![WatchdogRule::Anchor {
            table: "orders".into(),
            engine: Engine::Warehouse,
        }];
        let outcome = run_planning(&snapshot(config)).unwrap();
        assert!(!outcome.vetoes.is_empty());
        if let Some(bp) = outcome.accepted() {
            assert!(bp.table_locations("orders").unwrap().contains(Engine::Warehouse));
        }
    }

    #[test]
    fn run_planning_is_deterministic() {
        let snap = snapshot(config(SearchStrategyKind::SampledNeighborhood));
        let a = run_planning(&snap).unwrap();
        let b = run_planning(&snap).unwrap();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
    }

    #[tokio::test]
    async fn plan_records_run_and_emits_decision() {
        let store = StateStore::open_in_memory().unwrap();
        let events = EventLog::in_memory("shop");
        let planner = planner(store.clone(), events.clone());

        let run = planner.plan(&oversized()).await.unwrap();
        assert!(run.outcome.accepted().is_some());
        assert_eq!(store.list_runs("shop").unwrap(), vec![run.run_id.clone()]);

        let kinds: Vec<_> = events.recent().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![SystemEventKind::PlanAccepted]);
    }

    #[tokio::test]
    async fn estimator_annotates_snapshot() {
        let planner = planner(StateStore::open_in_memory().unwrap(), EventLog::in_memory("shop"))
            .with_estimator(Arc::new(ScanEstimator));
        let snap = planner.snapshot(&oversized(), 1).await.unwrap();
        assert_eq!(
            snap.workload.templates[0].predicted_scan_mb[&Engine::Serverless],
            10.0
        );
        assert_eq!(snap.seed, 1);
    }

    #[tokio::test]
    async fn replay_matches_then_detects_tampering() {
        let store = StateStore::open_in_memory().unwrap();
        let events = EventLog::in_memory("shop");
        let planner = planner(store.clone(), events.clone());
        let run = planner.plan(&oversized()).await.unwrap();

        let replayed = planner.replay("shop", &run.run_id).unwrap();
        assert_eq!(replayed, run.outcome);

        let mut tampered = run.clone();
        tampered.snapshot.workload.templates[0].arrivals_per_hour = 6000.0;
        tampered.snapshot.workload.txn_arrivals_per_s = 50.0;
        store.put_run("shop", &run.run_id, &tampered).unwrap();

        let err = planner.replay("shop", &run.run_id).unwrap_err();
        assert!(matches!(err, PlannerError::ReplayDivergence { .. }));
        assert!(
            events
                .recent()
                .iter()
                .any(|e| e.kind == SystemEventKind::ReplayDivergence)
        );
    }

    #[test]
    fn missing_run_is_reported() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            replay_run(&store, None, "shop", "nope"),
            Err(PlannerError::RunNotFound(_))
        ));
    }
}
