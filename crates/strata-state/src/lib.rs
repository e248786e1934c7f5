//! strata-state — durable state for Strata.
//!
//! Backed by [redb](https://docs.rs/redb). Holds versioned blueprints and
//! their versioning record, recorded planning runs, routing model assets,
//! and the system event log.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns, except
//! routing assets which are stored as the raw bytes the loader returns.
//! Keys are prefixed with the schema name (`{schema}/blueprints/00003`)
//! so one database can serve several schemas and prefix scans stay cheap.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod events;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use events::{EventLog, MEMLOG_CAPACITY};
pub use store::StateStore;
