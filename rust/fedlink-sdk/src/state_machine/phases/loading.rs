use async_trait::async_trait;
use tracing::{info, warn};

use crate::state_machine::{AwaitingGlobal, LocalWork, Phase, Step, TransitionOutcome};

/// Installing the global model into the local trainer.
#[derive(Debug)]
pub struct LoadingGlobal;

#[async_trait]
impl Step for Phase<LoadingGlobal> {
    async fn step(mut self) -> TransitionOutcome {
        if !self.io.global_model_present() {
            warn!("global model vanished before it could be loaded, waiting again");
            return TransitionOutcome::Complete(self.into_phase(AwaitingGlobal::new()).into());
        }

        match self.io.load_global_model().await {
            Ok(()) => {
                info!("global model loaded, starting local work");
                TransitionOutcome::Complete(self.into_phase(LocalWork::new()).into())
            }
            Err(e) => TransitionOutcome::Complete(self.roll_back(e).into()),
        }
    }
}
