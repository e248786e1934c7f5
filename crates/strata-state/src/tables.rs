//! redb table definitions.
//!
//! Every table maps `&str` keys to JSON (or raw asset) bytes. Keys start
//! with the schema name so one database can hold several schemas.

use redb::TableDefinition;

/// Shape shared by every Strata table.
pub type RawTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Blueprints keyed by `{schema}/blueprints/{version:05}`.
pub const BLUEPRINTS: RawTable = TableDefinition::new("blueprints");

/// Versioning record keyed by `{schema}/versioning`.
pub const VERSIONING: RawTable = TableDefinition::new("versioning");

/// Recorded planning runs keyed by `{schema}/runs/{run_id}`.
pub const PLANNING_RUNS: RawTable = TableDefinition::new("planning_runs");

/// Routing model assets keyed by `{schema}/assets/{name}`.
pub const ASSETS: RawTable = TableDefinition::new("assets");

/// System events keyed by `{schema}/{timestamp_nanos:020}/{seq:06}`.
pub const EVENTS: RawTable = TableDefinition::new("events");

pub fn blueprint_key(schema: &str, version: u64) -> String {
    format!("{schema}/blueprints/{version:05}")
}

pub fn versioning_key(schema: &str) -> String {
    format!("{schema}/versioning")
}

pub fn run_key(schema: &str, run_id: &str) -> String {
    format!("{schema}/runs/{run_id}")
}

pub fn asset_key(schema: &str, name: &str) -> String {
    format!("{schema}/assets/{name}")
}

pub fn event_key(schema: &str, timestamp_nanos: i64, seq: u64) -> String {
    format!("{schema}/{timestamp_nanos:020}/{seq:06}")
}
