use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::state_machine::{LoadingGlobal, Phase, RoundError, Step, TransitionOutcome};

/// Waiting for the global model of the round.
#[derive(Debug)]
pub struct AwaitingGlobal {
    /// Number of checks done so far
    pub attempts: u32,
    /// When the wait started
    pub since: Instant,
}

impl AwaitingGlobal {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            since: Instant::now(),
        }
    }
}

impl Default for AwaitingGlobal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for Phase<AwaitingGlobal> {
    async fn step(mut self) -> TransitionOutcome {
        let round = self.state.shared.round;
        self.state.private.attempts += 1;

        if self.io.server_configured() {
            match self.io.pull_global_model().await {
                Ok(bytes) => {
                    info!("received the global model of round {} ({} bytes)", round, bytes);
                    return self.into_loading();
                }
                Err(e) => warn!("failed to pull the global model: {}", e),
            }
        } else if self.io.global_model_present() {
            debug!("global model present for round {}", round);
            return self.into_loading();
        }

        if let Some(timeout) = self.state.shared.wait_timeout {
            if self.state.private.since.elapsed() >= timeout {
                return TransitionOutcome::Complete(
                    self.roll_back(RoundError::GlobalModelTimeout(timeout)).into(),
                );
            }
        }

        let attempt = self.state.private.attempts;
        info!(
            "waiting for the global model of round {} (attempt {})",
            round, attempt
        );
        self.io.notify_waiting(round, attempt);
        TransitionOutcome::Pending(self.into())
    }
}

impl Phase<AwaitingGlobal> {
    fn into_loading(mut self) -> TransitionOutcome {
        self.io.notify_global_model_ready(self.state.shared.round);
        TransitionOutcome::Complete(self.into_phase(LoadingGlobal).into())
    }
}
