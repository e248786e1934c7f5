//! Error types for blueprint transitions.

use thiserror::Error;

use strata_core::{BlueprintError, TransitionState};
use strata_state::StateError;

pub type TransitionResult<T> = Result<T, TransitionError>;

#[derive(Debug, Error)]
pub enum TransitionError {
    /// A transition is running or the state is not `Stable`. The request
    /// is rejected, not queued.
    #[error("transition already in progress (state {state})")]
    InProgress { state: TransitionState },

    #[error("pre-transition actions failed: {0}")]
    Prepare(String),

    #[error("reclaiming old resources failed: {0}")]
    Reclaim(String),

    #[error("illegal transition edge {from} -> {to}")]
    IllegalEdge {
        from: TransitionState,
        to: TransitionState,
    },

    #[error("{pending} worker(s) still hold blueprints older than version {version}")]
    AckTimeout { version: u64, pending: usize },

    #[error("no active blueprint for schema {0}")]
    NoActiveBlueprint(String),

    #[error("blueprint version {0} missing from the store")]
    MissingBlueprint(u64),

    #[error("invalid blueprint: {0}")]
    Invalid(#[from] BlueprintError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
