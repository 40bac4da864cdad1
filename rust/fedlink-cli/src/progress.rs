//! Terminal feedback for a running participant.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use fedlink_core::{
    storage::{LocalCheckpoint, RoundLogEntry},
    RoundNumber,
};
use fedlink_sdk::{Notify, RoundError, TransferProgress};

/// A [`Notify`] implementation logging the round events and drawing a progress bar while the
/// global model downloads.
#[derive(Default)]
pub struct ProgressNotifier {
    bar: Option<ProgressBar>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar_for(&mut self, total: Option<u64>) -> &ProgressBar {
        self.bar.get_or_insert_with(|| match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
                        .progress_chars("=> "),
                );
                bar.set_message("global model");
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg} {bytes}"));
                bar.set_message("global model");
                bar
            }
        })
    }

    /// Remove the progress bar of a finished download.
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.bar.is_some()
    }
}

impl Notify for ProgressNotifier {
    fn waiting_for_global_model(&mut self, round: RoundNumber, attempt: u32) {
        self.finish();
        if attempt == 1 {
            info!("waiting for the global model of round {}", round);
        } else {
            debug!("global model of round {} still missing (attempt {})", round, attempt);
        }
    }

    fn download_progress(&mut self, progress: TransferProgress) {
        self.bar_for(progress.total).set_position(progress.transferred);
    }

    fn global_model_ready(&mut self, round: RoundNumber) {
        self.finish();
        info!("global model of round {} ready", round);
    }

    fn epoch_completed(&mut self, entry: &RoundLogEntry) {
        info!(
            "round {} epoch {}: train loss {:.4}, val loss {:.4}, val metric {:.4}",
            entry.round, entry.epoch, entry.train_loss, entry.val_loss, entry.val_metric
        );
    }

    fn checkpoint_saved(&mut self, checkpoint: &LocalCheckpoint) {
        info!(
            "checkpoint of round {} saved to {}",
            checkpoint.round(),
            checkpoint.path().display()
        );
    }

    fn upload_failed(&mut self, round: RoundNumber, error: &RoundError) {
        warn!("upload of round {} failed: {}", round, error);
    }

    fn round_advanced(&mut self, round: RoundNumber, next_round: RoundNumber) {
        info!("server accepted round {}, next round is {}", round, next_round);
    }

    fn round_rolled_back(&mut self, round: RoundNumber, removed_rows: usize) {
        warn!(
            "round {} rolled back, {} log rows removed",
            round, removed_rows
        );
    }
}
