//! Planner error types.

use thiserror::Error;

use strata_core::BlueprintError;
use strata_state::StateError;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("blueprint error: {0}")]
    Blueprint(#[from] BlueprintError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("provider error: {0}")]
    Provider(#[from] anyhow::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("recorded planning run not found: {0}")]
    RunNotFound(String),

    /// Re-executing a recorded run produced a different outcome, which
    /// points at drift in the workload provider or estimator wiring.
    #[error("replay of run {run_id} diverged: recorded {recorded}, replayed {replayed}")]
    ReplayDivergence {
        run_id: String,
        recorded: String,
        replayed: String,
    },
}

pub type PlannerResult<T> = Result<T, PlannerError>;
