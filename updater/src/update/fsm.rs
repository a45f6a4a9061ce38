//! Phase state machine for an update run

use serde::{Deserialize, Serialize};

/// Phase of an update run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    /// No run in progress
    #[default]
    Idle,

    /// Connecting to the concentrator and stopping its polling
    Initializing,

    /// Collecting the device inventory
    GatheringInfo,

    /// Classifying devices against the target firmware
    Analyzing,

    /// Per-device firmware transfer
    Updating,

    /// Restoring concentrator state
    Restoring,

    /// Run finished (statistics distinguish "with errors")
    Completed,

    /// Run cancelled cooperatively
    Cancelled,

    /// Run could not proceed past setup
    Error,
}

impl UpdatePhase {
    /// Whether this phase ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdatePhase::Completed | UpdatePhase::Cancelled | UpdatePhase::Error
        )
    }
}

/// Update run FSM.
///
/// Transitions are validated so a bug in the orchestrator cannot silently
/// skip a phase or leave a terminal state.
#[derive(Debug, Clone, Default)]
pub struct UpdateFsm {
    phase: UpdatePhase,
}

impl UpdateFsm {
    /// Create a new FSM in the idle phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    /// Transition to `next`, rejecting invalid phase jumps
    pub fn transition(&mut self, next: UpdatePhase) -> Result<(), String> {
        use UpdatePhase::*;

        let allowed = match (self.phase, next) {
            (Idle, Initializing) => true,
            (Initializing, GatheringInfo) => true,
            (Initializing, Error) => true,
            (GatheringInfo, Analyzing) => true,
            (GatheringInfo, Restoring) => true,
            (GatheringInfo, Error) => true,
            (Analyzing, Updating) => true,
            (Analyzing, Restoring) => true,
            (Updating, Restoring) => true,
            (Restoring, Completed) => true,
            // Cooperative cancellation is observed at phase boundaries
            (from, Cancelled) if !from.is_terminal() => true,
            _ => false,
        };

        if !allowed {
            return Err(format!(
                "Invalid phase transition: {:?} -> {:?}",
                self.phase, next
            ));
        }

        self.phase = next;
        Ok(())
    }
}
