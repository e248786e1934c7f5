//! strata-transition — swaps the active blueprint without interrupting
//! query serving.
//!
//! # Components
//!
//! - **`BlueprintManager`**: persisted versioning record plus the active
//!   and pending blueprints.
//! - **`TransitionCoordinator`**: drives the four-state swap and owns the
//!   single in-progress guard.
//! - **`FrontEndWorker`**: query-serving handle that pins a blueprint
//!   version per query.
//! - **`TransitionActions` / `EngineDirectory`**: side effects run before
//!   and after the swap.

pub mod coordinator;
pub mod directory;
pub mod error;
pub mod manager;
pub mod worker;

pub use coordinator::{TransitionCoordinator, TransitionTicket};
pub use directory::{DirectoryActions, EngineDirectory, StaticDirectory, TransitionActions};
pub use error::{TransitionError, TransitionResult};
pub use manager::BlueprintManager;
pub use worker::{FrontEndWorker, Published, QueryPermit, WorkerRegistry};
