//! StateStore — one redb database holding every schema's planning state.
//!
//! Five tables, all keyed by `{schema}/...` (see [`crate::tables`]):
//! numbered blueprint versions, the per-schema versioning record that
//! says which version serves and whether a transition is underway,
//! recorded planning runs for replay, routing assets fetched lazily by
//! routers, and the append-only system event log. Everything except
//! assets is JSON.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use strata_core::{Blueprint, BlueprintVersioning, SystemEvent};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// `map_err!(Read)` builds the closure that wraps a redb error message
/// in `StateError::Read`.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Cheap to clone; clones share the database handle.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open the daemon's database file, creating it and any missing
    /// table on first start.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// A store whose blueprints, runs and events vanish on drop.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [BLUEPRINTS, VERSIONING, PLANNING_RUNS, ASSETS, EVENTS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Raw access ─────────────────────────────────────────────────

    fn put_raw(&self, table: RawTable, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_raw(&self, table: RawTable, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        Ok(t.get(key).map_err(map_err!(Read))?.map(|g| g.value().to_vec()))
    }

    fn delete_raw(&self, table: RawTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Key/value pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, table: RawTable, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push((key.value().to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }

    fn put_json<T: Serialize>(&self, table: RawTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.put_raw(table, key, &bytes)
    }

    fn get_json<T: DeserializeOwned>(&self, table: RawTable, key: &str) -> StateResult<Option<T>> {
        match self.get_raw(table, key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ── Blueprints ─────────────────────────────────────────────────

    pub fn put_blueprint(&self, version: u64, blueprint: &Blueprint) -> StateResult<()> {
        let key = blueprint_key(blueprint.schema_name(), version);
        let bytes = blueprint.to_json().map_err(map_err!(Serialize))?;
        self.put_raw(BLUEPRINTS, &key, &bytes)?;
        debug!(%key, "blueprint stored");
        Ok(())
    }

    /// Load and validate a stored blueprint.
    pub fn get_blueprint(&self, schema: &str, version: u64) -> StateResult<Option<Blueprint>> {
        match self.get_raw(BLUEPRINTS, &blueprint_key(schema, version))? {
            Some(bytes) => Blueprint::from_json(&bytes)
                .map(Some)
                .map_err(map_err!(Deserialize)),
            None => Ok(None),
        }
    }

    pub fn delete_blueprint(&self, schema: &str, version: u64) -> StateResult<bool> {
        let key = blueprint_key(schema, version);
        let existed = self.delete_raw(BLUEPRINTS, &key)?;
        debug!(%key, existed, "blueprint deleted");
        Ok(existed)
    }

    /// Stored blueprint versions for a schema, ascending.
    pub fn list_blueprint_versions(&self, schema: &str) -> StateResult<Vec<u64>> {
        let prefix = format!("{schema}/blueprints/");
        let mut versions: Vec<u64> = self
            .scan_prefix(BLUEPRINTS, &prefix)?
            .into_iter()
            .filter_map(|(key, _)| key[prefix.len()..].parse().ok())
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn put_versioning(&self, schema: &str, versioning: &BlueprintVersioning) -> StateResult<()> {
        self.put_json(VERSIONING, &versioning_key(schema), versioning)?;
        debug!(
            schema,
            version = versioning.version,
            state = %versioning.transition_state,
            next = ?versioning.next_version,
            "versioning stored"
        );
        Ok(())
    }

    pub fn get_versioning(&self, schema: &str) -> StateResult<Option<BlueprintVersioning>> {
        self.get_json(VERSIONING, &versioning_key(schema))
    }

    // ── Planning runs ──────────────────────────────────────────────

    pub fn put_run<T: Serialize>(&self, schema: &str, run_id: &str, run: &T) -> StateResult<()> {
        let key = run_key(schema, run_id);
        self.put_json(PLANNING_RUNS, &key, run)?;
        debug!(%key, "planning run recorded");
        Ok(())
    }

    pub fn get_run<T: DeserializeOwned>(&self, schema: &str, run_id: &str) -> StateResult<Option<T>> {
        self.get_json(PLANNING_RUNS, &run_key(schema, run_id))
    }

    /// Recorded run ids for a schema, in key order.
    pub fn list_runs(&self, schema: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{schema}/runs/");
        Ok(self
            .scan_prefix(PLANNING_RUNS, &prefix)?
            .into_iter()
            .map(|(key, _)| key[prefix.len()..].to_string())
            .collect())
    }

    // ── Routing assets ─────────────────────────────────────────────

    pub fn put_asset(&self, schema: &str, name: &str, bytes: &[u8]) -> StateResult<()> {
        let key = asset_key(schema, name);
        self.put_raw(ASSETS, &key, bytes)?;
        debug!(%key, len = bytes.len(), "asset stored");
        Ok(())
    }

    pub fn get_asset(&self, schema: &str, name: &str) -> StateResult<Option<Vec<u8>>> {
        self.get_raw(ASSETS, &asset_key(schema, name))
    }

    // ── System events ──────────────────────────────────────────────

    pub fn append_event(&self, schema: &str, seq: u64, event: &SystemEvent) -> StateResult<()> {
        let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.put_json(EVENTS, &event_key(schema, nanos, seq), event)
    }

    /// The `limit` most recent events for a schema, oldest first.
    pub fn list_events(&self, schema: &str, limit: usize) -> StateResult<Vec<SystemEvent>> {
        let prefix = format!("{schema}/");
        let rows = self.scan_prefix(EVENTS, &prefix)?;
        let skip = rows.len().saturating_sub(limit);
        rows.into_iter()
            .skip(skip)
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(map_err!(Deserialize)))
            .collect()
    }
}
