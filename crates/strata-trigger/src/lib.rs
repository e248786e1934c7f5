//! strata-trigger — decides when the planner should run.
//!
//! Triggers read rolling metric series from a [`strata_metrics::Monitor`]
//! and the clock. The [`TriggerEngine`] ORs them on every planning-loop
//! tick and also accepts manual replan requests.

pub mod engine;
pub mod forecast;
pub mod triggers;

pub use engine::{MANUAL_TRIGGER, ManualReplan, TriggerEngine};
pub use forecast::{Forecaster, MetricsThresholds};
pub use triggers::{
    ElapsedTime, LatencyCeiling, ObserveCutoff, RecentChange, ResourceUtilization, Trigger,
    VariableCost,
};
