//! System events emitted for external audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transition::TransitionState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemEventKind {
    ReplanTriggered { trigger: String },
    PlanAccepted,
    PlanSkipped,
    WatchdogVeto,
    TransitionStarting { state: TransitionState },
    TransitionCompleted { state: TransitionState },
    TransitionAborted,
    ManualBlueprintSet,
    ReplayDivergence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SystemEventKind,
    pub detail: String,
}

impl SystemEvent {
    pub fn now(kind: SystemEventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            detail: detail.into(),
        }
    }
}
