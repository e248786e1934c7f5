//! Blueprint manager — owns the persisted active/next blueprint pair.
//!
//! Every state change is written to the store before the in-memory copy
//! is updated, so a restart resumes from the last persisted state.

use std::sync::{Arc, RwLock};

use tracing::info;

use strata_core::{Blueprint, BlueprintVersioning, SystemEventKind, TransitionState};
use strata_state::{EventLog, StateStore};

use crate::error::{TransitionError, TransitionResult};

struct Versions {
    versioning: BlueprintVersioning,
    current: Arc<Blueprint>,
    next: Option<Arc<Blueprint>>,
}

pub struct BlueprintManager {
    schema: String,
    store: StateStore,
    events: EventLog,
    versions: RwLock<Versions>,
}

impl BlueprintManager {
    /// Load the persisted versioning record and its blueprints.
    pub fn load(schema: &str, store: StateStore, events: EventLog) -> TransitionResult<Self> {
        let versioning = store
            .get_versioning(schema)?
            .ok_or_else(|| TransitionError::NoActiveBlueprint(schema.to_string()))?;
        let current = fetch(&store, schema, versioning.version)?;
        let next = match versioning.next_version {
            Some(v) if !versioning.transition_state.is_stable() => Some(fetch(&store, schema, v)?),
            _ => None,
        };
        info!(
            schema,
            version = versioning.version,
            state = %versioning.transition_state,
            "blueprint manager loaded"
        );
        Ok(Self {
            schema: schema.to_string(),
            store,
            events,
            versions: RwLock::new(Versions {
                versioning,
                current,
                next,
            }),
        })
    }

    /// Load the schema if it has state, otherwise persist `initial` as
    /// version 1.
    pub fn bootstrap(initial: Blueprint, store: StateStore, events: EventLog) -> TransitionResult<Self> {
        let schema = initial.schema_name().to_string();
        if store.get_versioning(&schema)?.is_some() {
            return Self::load(&schema, store, events);
        }
        initial.validate()?;
        let versioning = BlueprintVersioning {
            version: 1,
            ..BlueprintVersioning::default()
        };
        store.put_blueprint(1, &initial)?;
        store.put_versioning(&schema, &versioning)?;
        info!(schema = %schema, "bootstrapped blueprint version 1");
        Ok(Self {
            schema,
            store,
            events,
            versions: RwLock::new(Versions {
                versioning,
                current: Arc::new(initial),
                next: None,
            }),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// The blueprint workers should serve: the next one once it has been
    /// published, the current one otherwise.
    pub fn get_blueprint(&self) -> Arc<Blueprint> {
        let v = self.read();
        match &v.next {
            Some(next) if v.versioning.transition_state.serves_next() => next.clone(),
            _ => v.current.clone(),
        }
    }

    /// The active version, regardless of transition state.
    pub fn current(&self) -> Arc<Blueprint> {
        self.read().current.clone()
    }

    pub fn next(&self) -> Option<Arc<Blueprint>> {
        self.read().next.clone()
    }

    pub fn versioning(&self) -> BlueprintVersioning {
        self.read().versioning
    }

    pub fn state(&self) -> TransitionState {
        self.read().versioning.transition_state
    }

    /// Replace the active blueprint outright. Only allowed while `Stable`.
    pub fn set_blueprint(&self, blueprint: Blueprint) -> TransitionResult<u64> {
        blueprint.validate()?;
        let mut v = self.write();
        let state = v.versioning.transition_state;
        if !state.is_stable() {
            return Err(TransitionError::InProgress { state });
        }
        let version = v.versioning.version + 1;
        self.store.put_blueprint(version, &blueprint)?;
        let versioning = BlueprintVersioning {
            version,
            ..BlueprintVersioning::default()
        };
        self.store.put_versioning(&self.schema, &versioning)?;
        v.versioning = versioning;
        v.current = Arc::new(blueprint);
        drop(v);

        self.events
            .record(SystemEventKind::ManualBlueprintSet, format!("version {version}"));
        Ok(version)
    }

    /// Persist `next` and move `Stable -> Transitioning`.
    pub fn start_transition(&self, next: Blueprint) -> TransitionResult<u64> {
        next.validate()?;
        let mut v = self.write();
        let from = v.versioning.transition_state;
        if !from.is_stable() {
            return Err(TransitionError::InProgress { state: from });
        }
        let version = v.versioning.version + 1;
        self.store.put_blueprint(version, &next)?;
        let versioning = BlueprintVersioning {
            version: v.versioning.version,
            transition_state: TransitionState::Transitioning,
            next_version: Some(version),
        };
        self.store.put_versioning(&self.schema, &versioning)?;
        v.versioning = versioning;
        v.next = Some(Arc::new(next));
        Ok(version)
    }

    /// Advance along the single legal edge. `CleaningUp -> Stable`
    /// promotes the next blueprint to active.
    pub fn update_transition_state(&self, to: TransitionState) -> TransitionResult<()> {
        let mut v = self.write();
        let from = v.versioning.transition_state;
        if !from.can_advance_to(to) {
            return Err(TransitionError::IllegalEdge { from, to });
        }

        let mut versioning = v.versioning;
        versioning.transition_state = to;
        let promoted = if to.is_stable() {
            let next = v.next.clone().ok_or(TransitionError::MissingBlueprint(
                versioning.next_version.unwrap_or_default(),
            ))?;
            versioning.version = versioning.next_version.take().unwrap_or(versioning.version);
            Some(next)
        } else {
            None
        };

        self.store.put_versioning(&self.schema, &versioning)?;
        v.versioning = versioning;
        if let Some(next) = promoted {
            v.current = next;
            v.next = None;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Versions> {
        self.versions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Versions> {
        self.versions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fetch(store: &StateStore, schema: &str, version: u64) -> TransitionResult<Arc<Blueprint>> {
    store
        .get_blueprint(schema, version)?
        .map(Arc::new)
        .ok_or(TransitionError::MissingBlueprint(version))
}
