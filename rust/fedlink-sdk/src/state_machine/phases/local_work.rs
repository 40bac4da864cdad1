use async_trait::async_trait;
use tracing::info;

use crate::state_machine::{Checkpointing, Phase, Step, TransitionOutcome};

/// Running the local epochs of the round.
#[derive(Debug)]
pub struct LocalWork {
    /// Number of epochs already run and logged
    pub completed: u32,
}

impl LocalWork {
    pub fn new() -> Self {
        Self { completed: 0 }
    }
}

impl Default for LocalWork {
    fn default() -> Self {
        Self::new()
    }
}

/// Each step runs a single epoch, so that a cancellation request is observed between epochs.
#[async_trait]
impl Step for Phase<LocalWork> {
    async fn step(mut self) -> TransitionOutcome {
        let round = self.state.shared.round;
        let epoch = self.state.private.completed + 1;

        let metrics = match self.io.run_epoch(self.state.shared.eval_threshold).await {
            Ok(metrics) => metrics,
            Err(e) => return TransitionOutcome::Complete(self.roll_back(e).into()),
        };
        match self.io.append_log(round, epoch, metrics) {
            Ok(entry) => self.io.notify_epoch_completed(&entry),
            Err(e) => return TransitionOutcome::Complete(self.roll_back(e).into()),
        }
        info!(
            "round {} epoch {}/{}: train loss {:.4}, val loss {:.4}, val metric {:.4}",
            round,
            epoch,
            self.state.shared.epochs_per_round,
            metrics.train_loss,
            metrics.evaluation.loss,
            metrics.evaluation.metric
        );

        self.state.private.completed = epoch;
        if epoch >= self.state.shared.epochs_per_round {
            TransitionOutcome::Complete(self.into_phase(Checkpointing).into())
        } else {
            TransitionOutcome::Complete(self.into())
        }
    }
}
