//! strata-planner — chooses the next blueprint.
//!
//! A planning run enumerates candidate blueprints near the current one,
//! drops structurally invalid or vetoed candidates, scores the rest with
//! the cost and latency model, and asks a comparator whether the best
//! candidate is worth a transition. Every run is recorded with its inputs
//! so it can be replayed bit for bit.
//!
//! # Modules
//!
//! - [`enumeration`]: distance-bounded placement and provisioning walks
//! - [`filters`]: structural filters and the watchdog
//! - [`scoring`]: cost, latency and transition estimates
//! - [`comparator`]: feasibility, ordering and acceptance
//! - [`search`]: neighborhood, sampled and beam strategies
//! - [`recording`]: snapshots, outcomes and digests
//! - [`planner`]: the async planner and replay

pub mod comparator;
pub mod enumeration;
pub mod error;
pub mod filters;
pub mod planner;
pub mod recording;
pub mod scoring;
pub mod search;

pub use comparator::{Ceilings, Comparator, ComparisonContext};
pub use error::{PlannerError, PlannerResult};
pub use filters::{Filter, FilterChain, Verdict, Watchdog};
pub use planner::{
    BlueprintPlanner, Estimator, PassthroughEstimator, WorkloadProvider, replay_run, run_planning,
};
pub use recording::{
    ExploredCandidate, PlanDecision, PlanningOutcome, PlanningSnapshot, RecordedRun, Veto,
    blueprint_digest,
};
pub use scoring::Scorer;
pub use search::SearchStrategy;
