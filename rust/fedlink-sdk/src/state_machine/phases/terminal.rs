use async_trait::async_trait;

use crate::state_machine::{Phase, RoundError, Step, TransitionOutcome};

/// The server accepted the checkpoint of the round.
#[derive(Debug)]
pub struct Advanced {
    /// What the relay answered
    pub response: serde_json::Value,
}

/// The round was aborted.
#[derive(Debug)]
pub struct RolledBack {
    pub reason: RoundError,
    /// The number of removed log rows, or why the log could not be rewritten
    pub removed_rows: Result<usize, RoundError>,
}

#[async_trait]
impl Step for Phase<Advanced> {
    async fn step(self) -> TransitionOutcome {
        TransitionOutcome::Pending(self.into())
    }
}

#[async_trait]
impl Step for Phase<RolledBack> {
    async fn step(self) -> TransitionOutcome {
        TransitionOutcome::Pending(self.into())
    }
}
