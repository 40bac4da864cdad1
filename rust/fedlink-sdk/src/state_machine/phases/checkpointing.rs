use async_trait::async_trait;
use tracing::info;

use crate::state_machine::{Phase, Step, TransitionOutcome, Uploading};

/// Persisting the local weights of the round.
#[derive(Debug)]
pub struct Checkpointing;

#[async_trait]
impl Step for Phase<Checkpointing> {
    async fn step(mut self) -> TransitionOutcome {
        let round = self.state.shared.round;
        match self.io.write_checkpoint(round).await {
            Ok(checkpoint) => {
                info!("checkpoint of round {} saved to {}", round, checkpoint.path().display());
                self.io.notify_checkpoint_saved(&checkpoint);
                TransitionOutcome::Complete(self.into_phase(Uploading::new(checkpoint)).into())
            }
            Err(e) => TransitionOutcome::Complete(self.roll_back(e).into()),
        }
    }
}
