//! Transition coordinator — drives the four-state blueprint swap.
//!
//! ```text
//! Stable -> Transitioning -> TransitionedPreCleanUp -> CleaningUp -> Stable
//! ```
//!
//! Only one transition runs at a time. Requests made while one is in
//! flight are rejected with [`TransitionError::InProgress`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use strata_core::config::TransitionConfig;
use strata_core::{Blueprint, SystemEventKind, TransitionState};
use strata_state::EventLog;

use crate::directory::TransitionActions;
use crate::error::{TransitionError, TransitionResult};
use crate::manager::BlueprintManager;
use crate::worker::{FrontEndWorker, Published, WorkerRegistry};

/// Clears the in-progress flag when dropped.
struct InProgressGuard(Arc<AtomicBool>);

impl InProgressGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle on a transition whose cleanup is still running.
#[derive(Debug)]
pub struct TransitionTicket {
    pub version: u64,
    cleanup: JoinHandle<TransitionResult<()>>,
}

impl TransitionTicket {
    pub fn is_finished(&self) -> bool {
        self.cleanup.is_finished()
    }

    /// Wait for reclamation and the return to `Stable`.
    pub async fn finished(self) -> TransitionResult<()> {
        self.cleanup
            .await
            .map_err(|e| TransitionError::Reclaim(e.to_string()))?
    }
}

pub struct TransitionCoordinator {
    manager: Arc<BlueprintManager>,
    actions: Arc<dyn TransitionActions>,
    events: EventLog,
    publisher: watch::Sender<Published>,
    registry: Arc<WorkerRegistry>,
    in_progress: Arc<AtomicBool>,
    ack_timeout: Duration,
}

impl TransitionCoordinator {
    pub fn new(
        manager: Arc<BlueprintManager>,
        actions: Arc<dyn TransitionActions>,
        events: EventLog,
        config: &TransitionConfig,
    ) -> Self {
        let (publisher, _) = watch::channel(Published {
            version: manager.versioning().serving_version(),
            blueprint: manager.get_blueprint(),
        });
        Self {
            manager,
            actions,
            events,
            publisher,
            registry: Arc::new(WorkerRegistry::default()),
            in_progress: Arc::new(AtomicBool::new(false)),
            ack_timeout: Duration::from_secs(config.ack_timeout_s),
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn manager(&self) -> &Arc<BlueprintManager> {
        &self.manager
    }

    /// Register a new front-end worker.
    pub fn worker(&self) -> FrontEndWorker {
        FrontEndWorker::new(self.registry.clone(), self.publisher.subscribe())
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst) || !self.manager.state().is_stable()
    }

    /// Forced replacement outside the transition protocol.
    pub fn set_blueprint(&self, blueprint: Blueprint) -> TransitionResult<u64> {
        let _guard = self.guard()?;
        let version = self.manager.set_blueprint(blueprint)?;
        self.publish();
        Ok(version)
    }

    /// Start swapping to `next`.
    ///
    /// Returns once every worker has confirmed the new blueprint; the
    /// ticket resolves when old-only resources have been reclaimed.
    pub async fn begin(&self, next: Blueprint) -> TransitionResult<TransitionTicket> {
        let guard = self.guard()?;
        let state = self.manager.state();
        if !state.is_stable() {
            return Err(TransitionError::InProgress { state });
        }
        next.validate()?;

        let current = self.manager.current();
        let diff = current.diff(&next);
        if let Err(e) = self.actions.prepare(&current, &next, &diff).await {
            warn!(schema = %self.manager.schema(), error = %e, "pre-transition actions failed");
            self.events
                .record(SystemEventKind::TransitionAborted, format!("prepare: {e}"));
            return Err(TransitionError::Prepare(e.to_string()));
        }

        self.events.record(
            SystemEventKind::TransitionStarting {
                state: TransitionState::Transitioning,
            },
            "",
        );
        let version = match self.manager.start_transition(next) {
            Ok(version) => version,
            Err(e) => {
                warn!(schema = %self.manager.schema(), error = %e, "could not persist next blueprint");
                self.events
                    .record(SystemEventKind::TransitionAborted, format!("persist: {e}"));
                return Err(e);
            }
        };
        self.events.record(
            SystemEventKind::TransitionCompleted {
                state: TransitionState::Transitioning,
            },
            format!("version {version}"),
        );
        info!(
            schema = %self.manager.schema(),
            version,
            tables_changed = diff.table_changes.len(),
            provisioning_changed = diff.changes_provisioning(),
            "transition started"
        );

        self.drive(version, guard).await
    }

    /// Continue a transition interrupted by a restart or an ack timeout.
    pub async fn resume(&self) -> TransitionResult<Option<TransitionTicket>> {
        let versioning = self.manager.versioning();
        if versioning.transition_state.is_stable() {
            return Ok(None);
        }
        let guard = self.guard()?;
        let version = versioning
            .next_version
            .ok_or(TransitionError::MissingBlueprint(versioning.version + 1))?;
        info!(
            schema = %self.manager.schema(),
            version,
            state = %versioning.transition_state,
            "resuming transition"
        );
        self.drive(version, guard).await.map(Some)
    }

    fn guard(&self) -> TransitionResult<InProgressGuard> {
        InProgressGuard::acquire(&self.in_progress).ok_or(TransitionError::InProgress {
            state: self.manager.state(),
        })
    }

    fn publish(&self) {
        let published = Published {
            version: self.manager.versioning().serving_version(),
            blueprint: self.manager.get_blueprint(),
        };
        info!(version = published.version, "blueprint published");
        self.publisher.send_replace(published);
    }

    async fn drive(&self, version: u64, guard: InProgressGuard) -> TransitionResult<TransitionTicket> {
        if self.manager.state() == TransitionState::Transitioning {
            advance(&self.manager, &self.events, TransitionState::TransitionedPreCleanUp)?;
        }
        self.publish();

        if self.manager.state() == TransitionState::TransitionedPreCleanUp {
            if tokio::time::timeout(self.ack_timeout, self.registry.wait_drained(version))
                .await
                .is_err()
            {
                let pending = self.registry.pending(version);
                warn!(version, pending, "workers did not confirm the new blueprint in time");
                return Err(TransitionError::AckTimeout { version, pending });
            }
            advance(&self.manager, &self.events, TransitionState::CleaningUp)?;
        }

        let previous = self.manager.current();
        let next = self
            .manager
            .next()
            .ok_or(TransitionError::MissingBlueprint(version))?;
        let manager = self.manager.clone();
        let actions = self.actions.clone();
        let events = self.events.clone();

        let cleanup = tokio::spawn(async move {
            let _guard = guard;
            let diff = previous.diff(&next);
            if let Err(e) = actions.reclaim(&previous, &next, &diff).await {
                warn!(version, error = %e, "reclaim failed, transition stays in cleaning_up");
                return Err(TransitionError::Reclaim(e.to_string()));
            }
            advance(&manager, &events, TransitionState::Stable)?;
            info!(schema = %manager.schema(), version, "transition complete");
            Ok(())
        });

        Ok(TransitionTicket { version, cleanup })
    }
}

fn advance(manager: &BlueprintManager, events: &EventLog, to: TransitionState) -> TransitionResult<()> {
    events.record(SystemEventKind::TransitionStarting { state: to }, "");
    manager.update_transition_state(to)?;
    events.record(
        SystemEventKind::TransitionCompleted { state: to },
        format!("serving version {}", manager.versioning().serving_version()),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use strata_core::{BlueprintDiff, Engine, EngineSet};
    use strata_state::StateStore;

    use super::*;
    use crate::directory::{DirectoryActions, StaticDirectory};
    use crate::manager::tests::blueprint;

    struct Failing {
        prepare: bool,
        reclaim: bool,
    }

    #[async_trait]
    impl TransitionActions for Failing {
        async fn prepare(&self, _: &Blueprint, _: &Blueprint, _: &BlueprintDiff) -> anyhow::Result<()> {
            if self.prepare {
                anyhow::bail!("could not create destination table");
            }
            Ok(())
        }

        async fn reclaim(&self, _: &Blueprint, _: &Blueprint, _: &BlueprintDiff) -> anyhow::Result<()> {
            if self.reclaim {
                anyhow::bail!("drop table timed out");
            }
            Ok(())
        }
    }

    fn coordinator(actions: Arc<dyn TransitionActions>) -> (Arc<TransitionCoordinator>, StateStore, EventLog) {
        let store = StateStore::open_in_memory().unwrap();
        let events = EventLog::in_memory("shop");
        let manager = BlueprintManager::bootstrap(
            blueprint(EngineSet::only(Engine::Oltp)),
            store.clone(),
            events.clone(),
        )
        .unwrap();
        let coordinator = TransitionCoordinator::new(
            Arc::new(manager),
            actions,
            events.clone(),
            &TransitionConfig::default(),
        );
        (Arc::new(coordinator), store, events)
    }

    fn directory() -> Arc<dyn TransitionActions> {
        Arc::new(DirectoryActions::new(StaticDirectory::local()))
    }

    async fn wait_for(manager: &BlueprintManager, state: TransitionState) {
        for _ in 0..200 {
            if manager.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("never reached {state}");
    }

    #[tokio::test]
    async fn full_transition_records_every_boundary() {
        let (coord, store, events) = coordinator(directory());
        let ticket = coord.begin(blueprint(EngineSet::all())).await.unwrap();
        assert_eq!(ticket.version, 2);
        ticket.finished().await.unwrap();

        let v = coord.manager().versioning();
        assert_eq!((v.version, v.transition_state), (2, TransitionState::Stable));
        assert_eq!(store.get_versioning("shop").unwrap(), Some(v));
        assert!(!coord.is_in_progress());

        use TransitionState::*;
        let kinds: Vec<_> = events.recent().into_iter().map(|e| e.kind).collect();
        let mut expected = Vec::new();
        for state in [Transitioning, TransitionedPreCleanUp, CleaningUp, Stable] {
            expected.push(SystemEventKind::TransitionStarting { state });
            expected.push(SystemEventKind::TransitionCompleted { state });
        }
        assert_eq!(kinds, expected);
    }

    #[tokio::test]
    async fn begin_is_rejected_while_workers_drain() {
        let (coord, _, _) = coordinator(directory());
        let worker = coord.worker();
        let permit = worker.begin_query();
        assert_eq!(permit.version(), 1);

        let running = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.begin(blueprint(EngineSet::all())).await })
        };
        wait_for(coord.manager(), TransitionState::TransitionedPreCleanUp).await;

        assert!(matches!(
            coord.begin(blueprint(EngineSet::only(Engine::Oltp))).await,
            Err(TransitionError::InProgress { .. })
        ));
        // New queries already see the next blueprint.
        assert_eq!(worker.begin_query().version(), 2);
        assert_eq!(*worker.blueprint().blueprint, blueprint(EngineSet::all()));

        drop(permit);
        let ticket = running.await.unwrap().unwrap();
        ticket.finished().await.unwrap();
        assert_eq!(coord.manager().state(), TransitionState::Stable);
    }

    #[tokio::test]
    async fn prepare_failure_leaves_stable() {
        let (coord, store, events) = coordinator(Arc::new(Failing {
            prepare: true,
            reclaim: false,
        }));
        let err = coord.begin(blueprint(EngineSet::all())).await.unwrap_err();
        assert!(matches!(err, TransitionError::Prepare(_)));

        assert_eq!(coord.manager().state(), TransitionState::Stable);
        assert_eq!(store.list_blueprint_versions("shop").unwrap(), vec![1]);
        assert!(!coord.is_in_progress());
        assert_eq!(
            events.recent().last().map(|e| e.kind.clone()),
            Some(SystemEventKind::TransitionAborted)
        );
    }

    /// Starts a competing transition from inside `prepare`.
    struct Racing {
        manager: Arc<BlueprintManager>,
    }

    #[async_trait]
    impl TransitionActions for Racing {
        async fn prepare(&self, _: &Blueprint, next: &Blueprint, _: &BlueprintDiff) -> anyhow::Result<()> {
            self.manager.start_transition(next.clone())?;
            Ok(())
        }

        async fn reclaim(&self, _: &Blueprint, _: &Blueprint, _: &BlueprintDiff) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn persist_failure_after_prepare_is_recorded() {
        let events = EventLog::in_memory("shop");
        let manager = Arc::new(
            BlueprintManager::bootstrap(
                blueprint(EngineSet::only(Engine::Oltp)),
                StateStore::open_in_memory().unwrap(),
                events.clone(),
            )
            .unwrap(),
        );
        let coord = TransitionCoordinator::new(
            manager.clone(),
            Arc::new(Racing { manager }),
            events.clone(),
            &TransitionConfig::default(),
        );

        let err = coord.begin(blueprint(EngineSet::all())).await.unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InProgress {
                state: TransitionState::Transitioning
            }
        ));
        assert!(!coord.is_in_progress());
        let last = events.recent().pop().unwrap();
        assert_eq!(last.kind, SystemEventKind::TransitionAborted);
        assert!(last.detail.starts_with("persist:"));
    }

    #[tokio::test]
    async fn ack_timeout_then_resume() {
        let (coord, _, _) = coordinator(directory());
        let coord = Arc::into_inner(coord)
            .unwrap()
            .with_ack_timeout(Duration::from_millis(30));
        let worker = coord.worker();
        let permit = worker.begin_query();

        let err = coord.begin(blueprint(EngineSet::all())).await.unwrap_err();
        assert!(matches!(err, TransitionError::AckTimeout { version: 2, pending: 1 }));
        assert_eq!(coord.manager().state(), TransitionState::TransitionedPreCleanUp);

        drop(permit);
        let ticket = coord.resume().await.unwrap().unwrap();
        ticket.finished().await.unwrap();
        assert_eq!(coord.manager().versioning().version, 2);
        assert!(coord.resume().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reclaim_failure_blocks_next_transition() {
        let (coord, _, _) = coordinator(Arc::new(Failing {
            prepare: false,
            reclaim: true,
        }));
        let ticket = coord.begin(blueprint(EngineSet::all())).await.unwrap();
        assert!(matches!(ticket.finished().await, Err(TransitionError::Reclaim(_))));

        assert_eq!(coord.manager().state(), TransitionState::CleaningUp);
        assert!(coord.is_in_progress());
        assert!(matches!(
            coord.begin(blueprint(EngineSet::only(Engine::Oltp))).await,
            Err(TransitionError::InProgress {
                state: TransitionState::CleaningUp
            })
        ));
    }

    #[tokio::test]
    async fn manual_set_publishes_to_workers() {
        let (coord, _, _) = coordinator(directory());
        let worker = coord.worker();
        assert_eq!(coord.set_blueprint(blueprint(EngineSet::all())).unwrap(), 2);
        assert_eq!(worker.blueprint().version, 2);
    }
}
