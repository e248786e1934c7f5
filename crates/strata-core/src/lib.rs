//! strata-core — shared types for the Strata federated database front end.
//!
//! Engines and engine bit-sets, tables, provisioning, immutable
//! blueprints, workload descriptors, scores, transition state, system
//! events, and the `strata.toml` configuration.

pub mod blueprint;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod provisioning;
pub mod score;
pub mod table;
pub mod transition;
pub mod workload;

pub use blueprint::{
    Blueprint, BlueprintDiff, Placement, PolicyRef, ProvisioningDiff, RoutingPolicySpec, TableDiff,
};
pub use config::StrataConfig;
pub use engine::{Engine, EngineSet};
pub use error::{BlueprintError, BlueprintResult};
pub use event::{SystemEvent, SystemEventKind};
pub use provisioning::{InstanceClass, Provisioning};
pub use score::Score;
pub use table::{Column, Table};
pub use transition::{BlueprintVersioning, TransitionState};
pub use workload::{PlanningMetrics, QueryRep, QueryTemplate, Workload};
