//! Addon Status
//!
//! The per-addon lifecycle state machine. Transitions are monotonic along
//! Starting → Started → Stopping → Stopped; Failed is reachable only from
//! Starting or Stopping and is terminal for that lifecycle instance (a
//! redeploy creates a new instance, not a transition out of Failed).

use serde::{Deserialize, Serialize};

/// Current lifecycle status of an addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddonStatus {
    /// Admitted to the run, no start attempt yet.
    Unstarted,
    /// A worker is driving the start sequence.
    Starting,
    /// Start completed; exposed services are visible to dependents.
    Started,
    /// A stop was requested and is in progress.
    Stopping,
    /// Stop completed.
    Stopped,
    /// The start or stop attempt failed. Terminal.
    Failed,
}

impl AddonStatus {
    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: AddonStatus) -> bool {
        use AddonStatus::*;
        matches!(
            (self, to),
            (Unstarted, Starting)
                | (Starting, Started)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Started, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    /// Terminal for the whole lifecycle instance.
    pub fn is_terminal(self) -> bool {
        matches!(self, AddonStatus::Stopped | AddonStatus::Failed)
    }

    pub fn is_started(self) -> bool {
        self == AddonStatus::Started
    }

    /// Terminal for a start attempt: the attempt can no longer end in
    /// Started, or already has.
    pub fn start_settled(self) -> bool {
        matches!(
            self,
            AddonStatus::Started | AddonStatus::Stopped | AddonStatus::Failed
        )
    }
}

impl Default for AddonStatus {
    fn default() -> Self {
        Self::Unstarted
    }
}

impl std::fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddonStatus::Unstarted => write!(f, "unstarted"),
            AddonStatus::Starting => write!(f, "starting"),
            AddonStatus::Started => write!(f, "started"),
            AddonStatus::Stopping => write!(f, "stopping"),
            AddonStatus::Stopped => write!(f, "stopped"),
            AddonStatus::Failed => write!(f, "failed"),
        }
    }
}
