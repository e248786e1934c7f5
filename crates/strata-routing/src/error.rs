//! Routing error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    /// No engine hosts every referenced table.
    #[error("no engine holds all of the referenced tables: {}", tables.join(", "))]
    NoCommonEngine { tables: Vec<String> },

    #[error("failed to load routing asset {name}: {reason}")]
    AssetLoad { name: String, reason: String },

    /// A recent fetch of this asset failed and the retry window is open.
    #[error("routing asset {name} unavailable after a failed fetch: {reason}")]
    AssetUnavailable { name: String, reason: String },

    #[error("failed to decode routing asset {name}: {source}")]
    AssetDecode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type RoutingResult<T> = Result<T, RoutingError>;
