//! Planning daemon — the long-lived loop tying triggers, the planner and
//! the transition coordinator together.
//!
//! Each tick:
//! 1. records new collector samples into the monitor, then reaps a
//!    finished cleanup or waits for a running one
//! 2. resumes a transition left unfinished by a restart or ack timeout
//! 3. asks the trigger engine whether to replan
//! 4. plans against the active blueprint and starts a transition when
//!    the planner accepts a candidate

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use strata_core::{Blueprint, StrataConfig, SystemEventKind};
use strata_metrics::{InMemoryMonitor, MetricsSource};
use strata_planner::{BlueprintPlanner, PlanDecision};
use strata_state::{EventLog, StateStore};
use strata_transition::{BlueprintManager, TransitionCoordinator, TransitionTicket};
use strata_trigger::{ManualReplan, TriggerEngine};

use crate::providers::load_blueprint;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No trigger fired.
    Idle,
    /// A transition or its cleanup is still running.
    TransitionBusy,
    /// An interrupted transition was picked up again.
    Resumed { version: u64 },
    /// The planner kept the active blueprint.
    Skipped { run_id: String },
    /// The planner accepted a candidate and the swap has started.
    Transitioned { run_id: String, version: u64 },
}

pub struct PlanningDaemon {
    triggers: TriggerEngine,
    planner: BlueprintPlanner,
    coordinator: Arc<TransitionCoordinator>,
    events: EventLog,
    cleanup: Option<TransitionTicket>,
    metrics: Option<MetricsFeed>,
}

struct MetricsFeed {
    source: Arc<dyn MetricsSource>,
    monitor: InMemoryMonitor,
}

impl PlanningDaemon {
    pub fn new(
        triggers: TriggerEngine,
        planner: BlueprintPlanner,
        coordinator: Arc<TransitionCoordinator>,
        events: EventLog,
    ) -> Self {
        Self {
            triggers,
            planner,
            coordinator,
            events,
            cleanup: None,
            metrics: None,
        }
    }

    /// Poll `source` at the start of every tick and record what it
    /// returns into `monitor`, which should be the one the triggers and
    /// the planner read.
    pub fn with_metrics(mut self, source: Arc<dyn MetricsSource>, monitor: InMemoryMonitor) -> Self {
        self.metrics = Some(MetricsFeed { source, monitor });
        self
    }

    pub fn manual_handle(&self) -> ManualReplan {
        self.triggers.manual_handle()
    }

    pub fn coordinator(&self) -> &Arc<TransitionCoordinator> {
        &self.coordinator
    }

    /// Wait for the cleanup of the last transition, if one is running.
    pub async fn wait_for_cleanup(&mut self) -> anyhow::Result<()> {
        if let Some(ticket) = self.cleanup.take() {
            ticket.finished().await?;
        }
        Ok(())
    }

    async fn collect_metrics(&self) {
        let Some(feed) = &self.metrics else {
            return;
        };
        match feed.source.poll().await {
            Ok(samples) if samples.is_empty() => {}
            Ok(samples) => {
                feed.monitor.ingest(&samples).await;
                debug!(samples = samples.len(), "metrics recorded");
            }
            Err(e) => warn!(error = %e, "metrics collection failed"),
        }
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> anyhow::Result<TickOutcome> {
        self.collect_metrics().await;

        if let Some(ticket) = self.cleanup.take_if(|t| t.is_finished()) {
            let version = ticket.version;
            if let Err(e) = ticket.finished().await {
                warn!(version, error = %e, "transition cleanup failed");
            }
        }
        if self.cleanup.is_some() {
            debug!("cleanup still running, skipping tick");
            return Ok(TickOutcome::TransitionBusy);
        }

        if !self.coordinator.manager().state().is_stable() {
            return match self.coordinator.resume().await? {
                Some(ticket) => {
                    let version = ticket.version;
                    self.cleanup = Some(ticket);
                    Ok(TickOutcome::Resumed { version })
                }
                None => Ok(TickOutcome::TransitionBusy),
            };
        }

        let Some(trigger) = self.triggers.should_replan(now).await else {
            return Ok(TickOutcome::Idle);
        };
        self.events.record(
            SystemEventKind::ReplanTriggered {
                trigger: trigger.clone(),
            },
            "",
        );

        let current = self.coordinator.manager().current();
        let run = self.planner.plan(&current).await?;
        let run_id = run.run_id;

        match run.outcome.decision {
            PlanDecision::Accepted {
                blueprint, score, ..
            } => {
                let ticket = self.coordinator.begin(blueprint.clone()).await?;
                let version = ticket.version;
                self.cleanup = Some(ticket);
                self.triggers.notify_replanned(now, &blueprint, Some(&score));
                info!(%run_id, %trigger, version, "blueprint transition started");
                Ok(TickOutcome::Transitioned { run_id, version })
            }
            PlanDecision::Skipped { rationale } => {
                self.triggers
                    .notify_replanned(now, &current, Some(&run.outcome.current_score));
                info!(%run_id, %trigger, %rationale, "keeping current blueprint");
                Ok(TickOutcome::Skipped { run_id })
            }
        }
    }

    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "planning loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "planning tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("planning loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Load the schema's blueprint manager, bootstrapping from the
/// configured blueprint file on first start.
pub fn open_manager(config: &StrataConfig, store: StateStore, events: EventLog) -> anyhow::Result<BlueprintManager> {
    let schema = &config.daemon.schema_name;
    if store.get_versioning(schema)?.is_some() {
        return Ok(BlueprintManager::load(schema, store, events)?);
    }
    let Some(path) = &config.daemon.bootstrap_blueprint else {
        anyhow::bail!("schema {schema} has no blueprint and [daemon].bootstrap_blueprint is unset");
    };
    let initial: Blueprint = load_blueprint(path)?;
    if initial.schema_name() != schema {
        anyhow::bail!(
            "bootstrap blueprint is for schema {}, expected {schema}",
            initial.schema_name()
        );
    }
    Ok(BlueprintManager::bootstrap(initial, store, events)?)
}
