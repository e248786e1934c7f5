//! stratad — the Strata planning daemon.
//!
//! # Components
//!
//! - **`PlanningDaemon`**: trigger evaluation, planning and transitions
//!   on a fixed tick
//! - **`FileWorkloadProvider`**: workload forecasts read from a JSON file
//! - **`FileMetricsProvider`**: collector samples fed to the monitor each tick
//! - **`open_manager`**: first-start bootstrap of the blueprint store

pub mod daemon;
pub mod providers;

pub use daemon::{PlanningDaemon, TickOutcome, open_manager};
pub use providers::{FileMetricsProvider, FileWorkloadProvider, load_blueprint};
