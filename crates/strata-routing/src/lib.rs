//! strata-routing — per-query engine selection.
//!
//! # Components
//!
//! - **`location_routing`**: intersect table locations to the feasible engines
//! - **`Policy`**: closed set of routing policies behind one dispatch
//! - **`DecisionForest`**: learned routing model loaded from a JSON asset
//! - **`PolicyCache`**: lazily fetched, process-wide routing assets
//! - **`Router`**: the resolution chain used by front-end workers

pub mod cache;
pub mod error;
pub mod forest;
pub mod location;
pub mod policy;
pub mod router;

pub use cache::{CachedDecisions, PolicyAssetLoader, PolicyCache, StoreAssetLoader};
pub use error::{RoutingError, RoutingResult};
pub use forest::{DecisionForest, DecisionTree, TreeNode};
pub use location::location_routing;
pub use policy::{Policy, RoundRobin};
pub use router::Router;
