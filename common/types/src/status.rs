use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing state shared by webhook events and stream messages.
///
/// Transitions only move forward, with one exception: `Failed -> Queued`
/// re-admits an event for a retry attempt. `Dead` and `Processed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Queued,
    Processing,
    Processed,
    Failed,
    Dead,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("illegal status transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: EventStatus,
    pub to: EventStatus,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::Dead)
    }

    pub fn can_transition(self, to: EventStatus) -> bool {
        use EventStatus::{Dead, Failed, Processed, Processing, Queued, Received};
        matches!(
            (self, to),
            (Received, Queued)
                | (Queued, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Failed, Queued)
                | (Failed, Dead)
        )
    }

    pub fn transition(&mut self, to: EventStatus) -> Result<(), InvalidTransition> {
        if !self.can_transition(to) {
            return Err(InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}
