//! Error types for blueprint construction and decoding.

use thiserror::Error;

use crate::engine::Engine;

/// Result type alias for blueprint operations.
pub type BlueprintResult<T> = Result<T, BlueprintError>;

/// Ways a blueprint can violate its structural invariants.
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("table {0} has no locations")]
    EmptyLocations(String),

    #[error("transactional table {0} is not placed on the oltp engine")]
    TransactionalOffOltp(String),

    #[error("table {table} is placed on {engine}, which has no provisioned capacity")]
    NoCapacity { table: String, engine: Engine },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    #[error("placement covers {got} tables, blueprint has {expected}")]
    PlacementShape { expected: usize, got: usize },

    #[error("blueprint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
