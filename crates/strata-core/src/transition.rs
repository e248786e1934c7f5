//! Blueprint transition states and the persisted versioning record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a blueprint swap.
///
/// ```text
/// Stable -> Transitioning -> TransitionedPreCleanUp -> CleaningUp -> Stable
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionState {
    /// One blueprint active, nothing in flight.
    #[default]
    Stable,
    /// Next blueprint persisted; workers still route against the old one.
    Transitioning,
    /// Next blueprint published; workers draining the old one.
    TransitionedPreCleanUp,
    /// All workers switched; old-only resources being reclaimed.
    CleaningUp,
}

impl TransitionState {
    /// The single state that may follow this one.
    pub fn next(self) -> TransitionState {
        match self {
            TransitionState::Stable => TransitionState::Transitioning,
            TransitionState::Transitioning => TransitionState::TransitionedPreCleanUp,
            TransitionState::TransitionedPreCleanUp => TransitionState::CleaningUp,
            TransitionState::CleaningUp => TransitionState::Stable,
        }
    }

    pub fn can_advance_to(self, to: TransitionState) -> bool {
        self.next() == to
    }

    pub fn is_stable(self) -> bool {
        self == TransitionState::Stable
    }

    /// Whether the next blueprint is the one workers should serve.
    pub fn serves_next(self) -> bool {
        matches!(
            self,
            TransitionState::TransitionedPreCleanUp | TransitionState::CleaningUp
        )
    }
}

impl fmt::Display for TransitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionState::Stable => "stable",
            TransitionState::Transitioning => "transitioning",
            TransitionState::TransitionedPreCleanUp => "transitioned_pre_cleanup",
            TransitionState::CleaningUp => "cleaning_up",
        };
        f.write_str(s)
    }
}

/// Active version, transition state, and the pending version if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlueprintVersioning {
    pub version: u64,
    pub transition_state: TransitionState,
    pub next_version: Option<u64>,
}

impl BlueprintVersioning {
    /// Version workers should currently serve.
    pub fn serving_version(&self) -> u64 {
        match self.next_version {
            Some(next) if self.transition_state.serves_next() => next,
            _ => self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_edges_are_legal() {
        use TransitionState::*;
        assert!(Stable.can_advance_to(Transitioning));
        assert!(Transitioning.can_advance_to(TransitionedPreCleanUp));
        assert!(TransitionedPreCleanUp.can_advance_to(CleaningUp));
        assert!(CleaningUp.can_advance_to(Stable));

        assert!(!Transitioning.can_advance_to(Stable));
        assert!(!TransitionedPreCleanUp.can_advance_to(Stable));
        assert!(!Stable.can_advance_to(CleaningUp));
        assert!(!Stable.can_advance_to(Stable));
    }

    #[test]
    fn serving_version_follows_state() {
        let mut v = BlueprintVersioning {
            version: 3,
            transition_state: TransitionState::Transitioning,
            next_version: Some(4),
        };
        assert_eq!(v.serving_version(), 3);
        v.transition_state = TransitionState::TransitionedPreCleanUp;
        assert_eq!(v.serving_version(), 4);
        v.transition_state = TransitionState::CleaningUp;
        assert_eq!(v.serving_version(), 4);
    }
}
