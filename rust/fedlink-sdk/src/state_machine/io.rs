use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task;
use tracing::debug;
use url::Url;

use super::RoundError;
use crate::{
    client::api_url,
    settings::CoordinatorSettings,
    EpochMetrics,
    LocalTrainer,
    Notify,
    TransferChannel,
};
use fedlink_core::{
    storage::{CheckpointStore, GlobalModelSlot, LocalCheckpoint, RoundLog, RoundLogEntry},
    ClientId,
    RoundNumber,
};

/// Returned a dynamically dispatched [`IO`] object
pub(crate) fn boxed_io<C, T, N>(
    channel: C,
    trainer: T,
    notifier: N,
    settings: &CoordinatorSettings,
) -> PhaseIo
where
    C: TransferChannel + Send + 'static,
    T: LocalTrainer + Send + 'static,
    N: Notify + Send + 'static,
{
    Box::new(StateMachineIO::new(channel, trainer, notifier, settings))
}

/// A dynamically dispatched [`IO`] object.
pub(crate) type PhaseIo = Box<dyn IO>;

/// A trait that gathers everything the phases need from the outside world: the transfer channel,
/// the local trainer, the local storage and the notifier.
///
/// This trait is intended not to be exposed. It is a convenience for avoiding the
/// proliferation of generic parameters in the state machine, and makes it possible to
/// test every phase against a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait IO: Send + 'static {
    /// Whether a federated server is configured to pull the global model from.
    fn server_configured(&self) -> bool;
    /// Whether the global model slot holds a model.
    fn global_model_present(&self) -> bool;
    /// Download the global model from the federated server into the slot.
    async fn pull_global_model(&mut self) -> Result<u64, RoundError>;
    /// Install the content of the global model slot into the local trainer.
    async fn load_global_model(&mut self) -> Result<(), RoundError>;
    /// Run one training epoch followed by an evaluation.
    async fn run_epoch(&mut self, threshold: f64) -> Result<EpochMetrics, RoundError>;
    /// Log the metrics of an epoch.
    fn append_log(
        &mut self,
        round: RoundNumber,
        epoch: u32,
        metrics: EpochMetrics,
    ) -> Result<RoundLogEntry, RoundError>;
    /// Persist the weights of the local trainer as the checkpoint of `round`.
    async fn write_checkpoint(&mut self, round: RoundNumber) -> Result<LocalCheckpoint, RoundError>;
    /// Send a checkpoint to the relay.
    async fn upload_checkpoint(
        &mut self,
        checkpoint: LocalCheckpoint,
        client_id: ClientId,
        round: RoundNumber,
    ) -> Result<serde_json::Value, RoundError>;
    /// Remove the log rows of `round`.
    fn rollback_log(&mut self, round: RoundNumber) -> Result<usize, RoundError>;
    /// Remove the checkpoint of `round`.
    fn remove_checkpoint(&mut self, round: RoundNumber) -> Result<bool, RoundError>;

    /// Notify the participant that the global model is not available yet
    fn notify_waiting(&mut self, round: RoundNumber, attempt: u32);
    /// Notify the participant that the global model is ready to be loaded
    fn notify_global_model_ready(&mut self, round: RoundNumber);
    /// Notify the participant that an epoch has been logged
    fn notify_epoch_completed(&mut self, entry: &RoundLogEntry);
    /// Notify the participant that a checkpoint has been written
    fn notify_checkpoint_saved(&mut self, checkpoint: &LocalCheckpoint);
    /// Notify the participant that the upload of a checkpoint failed
    fn notify_upload_failed(&mut self, round: RoundNumber, error: &RoundError);
    /// Notify the participant that the server accepted the checkpoint
    fn notify_round_advanced(&mut self, round: RoundNumber, next_round: RoundNumber);
    /// Notify the participant that a round has been rolled back
    fn notify_round_rolled_back(&mut self, round: RoundNumber, removed_rows: usize);
}

/// Internal struct that implements the [`IO`] trait. It is not used as is in the state
/// machine. Instead, we box it and use it as a `dyn IO` object.
struct StateMachineIO<C, T, N> {
    channel: C,
    /// Shared with the blocking threads running the trainer
    trainer: Arc<Mutex<T>>,
    notifier: N,
    slot: GlobalModelSlot,
    checkpoints: CheckpointStore,
    log: RoundLog,
    server_url: Option<Url>,
    relay_url: Url,
}

impl<C, T, N> StateMachineIO<C, T, N> {
    /// Create a new `StateMachineIO`
    fn new(channel: C, trainer: T, notifier: N, settings: &CoordinatorSettings) -> Self {
        Self {
            channel,
            trainer: Arc::new(Mutex::new(trainer)),
            notifier,
            slot: GlobalModelSlot::new(&settings.storage.global_model_path),
            checkpoints: CheckpointStore::new(&settings.storage.checkpoint_dir),
            log: RoundLog::new(&settings.storage.log_path),
            server_url: settings.endpoints.server_url.clone(),
            relay_url: settings.endpoints.relay_url.clone(),
        }
    }
}

fn lock<T>(trainer: &Mutex<T>) -> Result<MutexGuard<'_, T>, RoundError> {
    trainer
        .lock()
        .map_err(|_| RoundError::Training("a previous trainer call panicked".to_string()))
}

/// Run `f` against the trainer on the blocking thread pool.
async fn with_trainer<T, F, R>(trainer: &Arc<Mutex<T>>, f: F) -> Result<R, RoundError>
where
    T: Send + 'static,
    F: FnOnce(&mut T) -> Result<R, RoundError> + Send + 'static,
    R: Send + 'static,
{
    let trainer = Arc::clone(trainer);
    task::spawn_blocking(move || f(&mut *lock(&*trainer)?))
        .await
        .map_err(|e| RoundError::Training(e.to_string()))?
}

#[async_trait]
impl<C, T, N> IO for StateMachineIO<C, T, N>
where
    C: TransferChannel + Send + 'static,
    T: LocalTrainer + Send + 'static,
    N: Notify + Send + 'static,
{
    fn server_configured(&self) -> bool {
        self.server_url.is_some()
    }

    fn global_model_present(&self) -> bool {
        self.slot.is_present()
    }

    async fn pull_global_model(&mut self) -> Result<u64, RoundError> {
        let server_url = self.server_url.as_ref().ok_or_else(|| {
            RoundError::RemoteUnavailable("no federated server configured".to_string())
        })?;
        let url = api_url(server_url, "get-global-model");
        let Self {
            channel,
            notifier,
            slot,
            ..
        } = self;
        channel
            .download(&url, slot.path(), &mut |progress| {
                notifier.download_progress(progress)
            })
            .await
            .map_err(RoundError::from)
    }

    async fn load_global_model(&mut self) -> Result<(), RoundError> {
        let weights = self.slot.read()?;
        debug!("loading {} bytes of global model", weights.len());
        with_trainer(&self.trainer, move |trainer| {
            trainer
                .load_state(&weights)
                .map_err(|e| RoundError::CorruptGlobalModel(e.to_string()))
        })
        .await
    }

    async fn run_epoch(&mut self, threshold: f64) -> Result<EpochMetrics, RoundError> {
        with_trainer(&self.trainer, move |trainer| {
            let train_loss = trainer
                .train_epoch()
                .map_err(|e| RoundError::Training(e.to_string()))?;
            let evaluation = trainer
                .evaluate(threshold)
                .map_err(|e| RoundError::Training(e.to_string()))?;
            Ok(EpochMetrics {
                train_loss,
                evaluation,
            })
        })
        .await
    }

    fn append_log(
        &mut self,
        round: RoundNumber,
        epoch: u32,
        metrics: EpochMetrics,
    ) -> Result<RoundLogEntry, RoundError> {
        self.log
            .append(
                round,
                epoch,
                metrics.train_loss,
                metrics.evaluation.loss,
                metrics.evaluation.metric,
            )
            .map_err(RoundError::from)
    }

    async fn write_checkpoint(&mut self, round: RoundNumber) -> Result<LocalCheckpoint, RoundError> {
        let weights = with_trainer(&self.trainer, |trainer| {
            trainer
                .save_state()
                .map_err(|e| RoundError::Training(e.to_string()))
        })
        .await?;
        let checkpoints = self.checkpoints.clone();
        task::spawn_blocking(move || checkpoints.write(round, &weights))
            .await
            .map_err(|e| RoundError::Storage(e.to_string()))?
            .map_err(RoundError::from)
    }

    async fn upload_checkpoint(
        &mut self,
        checkpoint: LocalCheckpoint,
        client_id: ClientId,
        round: RoundNumber,
    ) -> Result<serde_json::Value, RoundError> {
        let dataset_size = lock(&*self.trainer)?.dataset_size();
        let mut fields = vec![
            ("client_id".to_string(), client_id.to_string()),
            ("dataset_size".to_string(), dataset_size.to_string()),
            ("cur_round".to_string(), round.to_string()),
        ];
        if let Some(server_url) = &self.server_url {
            fields.push((
                "federated_server_url".to_string(),
                server_url.as_str().trim_end_matches('/').to_string(),
            ));
        }
        let url = api_url(&self.relay_url, "send-local-model");
        self.channel
            .upload(&url, checkpoint.path(), &fields)
            .await
            .map_err(RoundError::from)
    }

    fn rollback_log(&mut self, round: RoundNumber) -> Result<usize, RoundError> {
        self.log.rollback(round).map_err(RoundError::from)
    }

    fn remove_checkpoint(&mut self, round: RoundNumber) -> Result<bool, RoundError> {
        self.checkpoints.remove(round).map_err(RoundError::from)
    }

    fn notify_waiting(&mut self, round: RoundNumber, attempt: u32) {
        self.notifier.waiting_for_global_model(round, attempt)
    }

    fn notify_global_model_ready(&mut self, round: RoundNumber) {
        self.notifier.global_model_ready(round)
    }

    fn notify_epoch_completed(&mut self, entry: &RoundLogEntry) {
        self.notifier.epoch_completed(entry)
    }

    fn notify_checkpoint_saved(&mut self, checkpoint: &LocalCheckpoint) {
        self.notifier.checkpoint_saved(checkpoint)
    }

    fn notify_upload_failed(&mut self, round: RoundNumber, error: &RoundError) {
        self.notifier.upload_failed(round, error)
    }

    fn notify_round_advanced(&mut self, round: RoundNumber, next_round: RoundNumber) {
        self.notifier.round_advanced(round, next_round)
    }

    fn notify_round_rolled_back(&mut self, round: RoundNumber, removed_rows: usize) {
        self.notifier.round_rolled_back(round, removed_rows)
    }
}

/// A notifier that does nothing.
pub struct PassiveNotifier;

impl Notify for PassiveNotifier {}
