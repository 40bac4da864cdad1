use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::{client::TransferError, state_machine::RoundError};
use fedlink_core::{
    storage::{LocalCheckpoint, RoundLogEntry},
    Evaluation,
    RoundNumber,
};

/// The progress of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes received so far.
    pub transferred: u64,
    /// The length announced by the remote, if any.
    pub total: Option<u64>,
}

/// The metrics of one local epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub train_loss: f64,
    pub evaluation: Evaluation,
}

/// The machine learning side of a participant.
///
/// The coordinator never looks inside the model: it hands the serialized global weights to
/// [`LocalTrainer::load_state`], asks for epochs to be run and finally retrieves the serialized
/// local weights with [`LocalTrainer::save_state`]. All methods are called from a blocking thread,
/// so implementations are free to run long computations.
pub trait LocalTrainer {
    type Error: ::std::error::Error + Send + Sync + 'static;

    /// Install the given serialized weights into the local model.
    fn load_state(&mut self, weights: &[u8]) -> Result<(), Self::Error>;

    /// Serialize the weights of the local model.
    fn save_state(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Run one training epoch over the local data and return the training loss.
    fn train_epoch(&mut self) -> Result<f64, Self::Error>;

    /// Evaluate the local model on the validation data.
    fn evaluate(&mut self, threshold: f64) -> Result<Evaluation, Self::Error>;

    /// The number of local training examples, reported to the server for weighting.
    fn dataset_size(&self) -> usize;
}

/// A trait used by the [`RoundCoordinator`] to emit notifications upon
/// certain events.
///
/// [`RoundCoordinator`]: crate::RoundCoordinator
pub trait Notify {
    /// Emit a notification each time the global model of a round is not available yet
    fn waiting_for_global_model(&mut self, _round: RoundNumber, _attempt: u32) {}
    /// Emit a notification while the global model is downloaded
    fn download_progress(&mut self, _progress: TransferProgress) {}
    /// Emit a notification when the global model is available for loading
    fn global_model_ready(&mut self, _round: RoundNumber) {}
    /// Emit a notification when a local epoch has been logged
    fn epoch_completed(&mut self, _entry: &RoundLogEntry) {}
    /// Emit a notification when the local weights of a round have been persisted
    fn checkpoint_saved(&mut self, _checkpoint: &LocalCheckpoint) {}
    /// Emit a notification when the checkpoint could not be delivered
    fn upload_failed(&mut self, _round: RoundNumber, _error: &RoundError) {}
    /// Emit a notification when the server accepted the checkpoint of a round
    fn round_advanced(&mut self, _round: RoundNumber, _next_round: RoundNumber) {}
    /// Emit a notification when the log rows of an aborted round have been removed
    fn round_rolled_back(&mut self, _round: RoundNumber, _removed_rows: usize) {}
}

/// A trait used by the [`RoundCoordinator`] to move model bytes between the participant and the
/// remote endpoints.
///
/// Implementations must not retry on their own: retry policy belongs to the coordinator.
///
/// [`RoundCoordinator`]: crate::RoundCoordinator
#[async_trait]
pub trait TransferChannel {
    /// Download `url` to `destination` and return the number of bytes written.
    ///
    /// `destination` must only become visible once the whole body has been received.
    async fn download(
        &mut self,
        url: &Url,
        destination: &Path,
        progress: &mut (dyn FnMut(TransferProgress) + Send),
    ) -> Result<u64, TransferError>;

    /// Post `file` together with the given text `fields` as a multipart form and return the
    /// response body.
    async fn upload(
        &mut self,
        url: &Url,
        file: &Path,
        fields: &[(String, String)],
    ) -> Result<serde_json::Value, TransferError>;

    /// Retrieve the round counter published by the federated server.
    async fn current_round(&mut self, server_url: &Url) -> Result<RoundNumber, TransferError>;
}
