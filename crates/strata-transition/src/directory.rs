//! Engine directory and the side effects that bracket a transition.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info};

use strata_core::{Blueprint, BlueprintDiff, Engine};

/// Registered engine endpoints.
pub trait EngineDirectory: Send + Sync {
    fn endpoint(&self, engine: Engine) -> Option<String>;
}

/// Fixed endpoint map, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory(BTreeMap<Engine, String>);

impl StaticDirectory {
    pub fn new(endpoints: BTreeMap<Engine, String>) -> Self {
        Self(endpoints)
    }

    /// Every engine registered under `{engine}.local`.
    pub fn local() -> Self {
        Self(
            Engine::ALL
                .iter()
                .map(|e| (*e, format!("{e}.local")))
                .collect(),
        )
    }

    pub fn without(mut self, engine: Engine) -> Self {
        self.0.remove(&engine);
        self
    }
}

impl EngineDirectory for StaticDirectory {
    fn endpoint(&self, engine: Engine) -> Option<String> {
        self.0.get(&engine).cloned()
    }
}

/// Work done before the new blueprint is persisted and after every
/// worker has let go of the old one.
#[async_trait]
pub trait TransitionActions: Send + Sync {
    /// Create whatever `next` needs that `current` lacks. Runs while the
    /// system is still `Stable`; an error aborts the transition.
    async fn prepare(&self, current: &Blueprint, next: &Blueprint, diff: &BlueprintDiff) -> anyhow::Result<()>;

    /// Drop what only `previous` used.
    async fn reclaim(&self, previous: &Blueprint, next: &Blueprint, diff: &BlueprintDiff) -> anyhow::Result<()>;
}

/// Actions that check each touched engine is registered and log the
/// copies created or dropped on it.
pub struct DirectoryActions<D> {
    directory: D,
}

impl<D: EngineDirectory> DirectoryActions<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    fn resolve(&self, engine: Engine) -> anyhow::Result<String> {
        self.directory
            .endpoint(engine)
            .ok_or_else(|| anyhow::anyhow!("engine {engine} is not registered in the directory"))
    }
}

#[async_trait]
impl<D: EngineDirectory> TransitionActions for DirectoryActions<D> {
    async fn prepare(&self, _current: &Blueprint, next: &Blueprint, diff: &BlueprintDiff) -> anyhow::Result<()> {
        for engine in next.engines_in_use().iter() {
            let endpoint = self.resolve(engine)?;
            debug!(%engine, %endpoint, "engine reachable");
        }
        for change in &diff.table_changes {
            for engine in change.added.iter() {
                let endpoint = self.resolve(engine)?;
                info!(table = %change.name, %engine, %endpoint, "creating table copy");
            }
        }
        for change in &diff.provisioning_changes {
            info!(
                engine = %change.engine,
                before = ?change.before,
                after = ?change.after,
                "provisioning change scheduled"
            );
        }
        Ok(())
    }

    async fn reclaim(&self, _previous: &Blueprint, _next: &Blueprint, diff: &BlueprintDiff) -> anyhow::Result<()> {
        for change in &diff.table_changes {
            for engine in change.removed.iter() {
                let endpoint = self.resolve(engine)?;
                info!(table = %change.name, %engine, %endpoint, "dropping table copy");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_core::EngineSet;

    use super::*;
    use crate::manager::tests::blueprint;

    #[tokio::test]
    async fn prepare_requires_registered_engines() {
        let current = blueprint(EngineSet::only(Engine::Oltp));
        let next = blueprint(EngineSet::from(vec![Engine::Oltp, Engine::Warehouse]));
        let diff = current.diff(&next);

        let ok = DirectoryActions::new(StaticDirectory::local());
        ok.prepare(&current, &next, &diff).await.unwrap();

        let missing = DirectoryActions::new(StaticDirectory::local().without(Engine::Warehouse));
        let err = missing.prepare(&current, &next, &diff).await.unwrap_err();
        assert!(err.to_string().contains("warehouse"));
    }

    #[tokio::test]
    async fn reclaim_resolves_removed_copies() {
        let previous = blueprint(EngineSet::from(vec![Engine::Oltp, Engine::Serverless]));
        let next = blueprint(EngineSet::only(Engine::Oltp));
        let diff = previous.diff(&next);

        let actions = DirectoryActions::new(StaticDirectory::local().without(Engine::Serverless));
        assert!(actions.reclaim(&previous, &next, &diff).await.is_err());
        let actions = DirectoryActions::new(StaticDirectory::local());
        actions.reclaim(&previous, &next, &diff).await.unwrap();
    }
}
