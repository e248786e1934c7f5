//! Front-end worker handles.
//!
//! Workers read the published blueprint from a `watch` channel without
//! locking. Every query holds a [`QueryPermit`] for the version it was
//! routed against; the coordinator waits until no worker holds a permit
//! older than the version it just published before reclaiming anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Notify, watch};
use tracing::debug;

use strata_core::Blueprint;

/// A blueprint as seen by workers.
#[derive(Debug, Clone)]
pub struct Published {
    pub version: u64,
    pub blueprint: Arc<Blueprint>,
}

/// In-flight query counts per worker and per blueprint version.
#[derive(Default)]
pub struct WorkerRegistry {
    next_id: AtomicU64,
    inflight: Mutex<HashMap<u64, BTreeMap<u64, usize>>>,
    released: Notify,
}

impl WorkerRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, BTreeMap<u64, usize>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, BTreeMap::new());
        debug!(worker = id, "worker registered");
        id
    }

    fn deregister(&self, id: u64) {
        self.lock().remove(&id);
        self.released.notify_waiters();
        debug!(worker = id, "worker deregistered");
    }

    fn release(&self, id: u64, version: u64) {
        {
            let mut inflight = self.lock();
            if let Some(counts) = inflight.get_mut(&id)
                && let Some(count) = counts.get_mut(&version)
            {
                *count -= 1;
                if *count == 0 {
                    counts.remove(&version);
                }
            }
        }
        self.released.notify_waiters();
    }

    pub fn worker_count(&self) -> usize {
        self.lock().len()
    }

    /// Workers still holding a permit for a version older than `version`.
    pub fn pending(&self, version: u64) -> usize {
        self.lock()
            .values()
            .filter(|counts| counts.keys().next().is_some_and(|oldest| *oldest < version))
            .count()
    }

    /// Resolves once every worker has confirmed `version`.
    pub async fn wait_drained(&self, version: u64) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.pending(version) == 0 {
                return;
            }
            released.await;
        }
    }
}

/// One query-serving front end.
pub struct FrontEndWorker {
    id: u64,
    registry: Arc<WorkerRegistry>,
    published: watch::Receiver<Published>,
}

impl FrontEndWorker {
    pub(crate) fn new(registry: Arc<WorkerRegistry>, published: watch::Receiver<Published>) -> Self {
        let id = registry.register();
        Self {
            id,
            registry,
            published,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The blueprint a query started now would use.
    pub fn blueprint(&self) -> Published {
        self.published.borrow().clone()
    }

    /// Pin the current blueprint for the duration of one query.
    pub fn begin_query(&self) -> QueryPermit {
        // Count the permit under the registry lock so a concurrent drain
        // check never misses a query routed against the old version.
        let mut inflight = self.registry.lock();
        let published = self.published.borrow().clone();
        *inflight
            .entry(self.id)
            .or_default()
            .entry(published.version)
            .or_insert(0) += 1;
        drop(inflight);

        QueryPermit {
            worker: self.id,
            registry: self.registry.clone(),
            published,
        }
    }

    /// Mark the latest publication as seen and return its version.
    pub fn sync(&mut self) -> u64 {
        self.published.borrow_and_update().version
    }

    /// Wait for the next publication. Returns `false` once the
    /// coordinator is gone.
    pub async fn changed(&mut self) -> bool {
        self.published.changed().await.is_ok()
    }
}

impl Drop for FrontEndWorker {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// A query's hold on one blueprint version.
pub struct QueryPermit {
    worker: u64,
    registry: Arc<WorkerRegistry>,
    published: Published,
}

impl QueryPermit {
    pub fn version(&self) -> u64 {
        self.published.version
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.published.blueprint
    }
}

impl Drop for QueryPermit {
    fn drop(&mut self) {
        self.registry.release(self.worker, self.published.version);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_core::{Engine, EngineSet};

    use super::*;
    use crate::manager::tests::blueprint;

    fn channel(version: u64) -> (watch::Sender<Published>, Arc<WorkerRegistry>) {
        let (tx, _) = watch::channel(Published {
            version,
            blueprint: Arc::new(blueprint(EngineSet::only(Engine::Oltp))),
        });
        (tx, Arc::new(WorkerRegistry::default()))
    }

    #[test]
    fn permits_pin_their_version() {
        let (tx, registry) = channel(1);
        let worker = FrontEndWorker::new(registry.clone(), tx.subscribe());
        let old = worker.begin_query();

        tx.send_replace(Published {
            version: 2,
            blueprint: Arc::new(blueprint(EngineSet::all())),
        });
        let new = worker.begin_query();
        assert_eq!((old.version(), new.version()), (1, 2));
        assert_eq!(registry.pending(2), 1);

        drop(old);
        assert_eq!(registry.pending(2), 0);
    }

    #[test]
    fn dropping_worker_deregisters() {
        let (tx, registry) = channel(1);
        let worker = FrontEndWorker::new(registry.clone(), tx.subscribe());
        assert_eq!(registry.worker_count(), 1);
        drop(worker);
        assert_eq!(registry.worker_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_last_permit() {
        let (tx, registry) = channel(1);
        let mut worker = FrontEndWorker::new(registry.clone(), tx.subscribe());
        let permit = worker.begin_query();
        tx.send_replace(Published {
            version: 2,
            blueprint: Arc::new(blueprint(EngineSet::all())),
        });
        assert!(worker.changed().await);
        assert_eq!(worker.sync(), 2);

        let drained = tokio::time::timeout(Duration::from_millis(20), registry.wait_drained(2)).await;
        assert!(drained.is_err());

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_drained(2).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
