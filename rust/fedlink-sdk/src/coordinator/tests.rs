use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use url::Url;

use super::*;
use crate::{
    client::TransferError,
    settings::{EndpointSettings, RoundSettings, StorageSettings},
    TransferProgress,
};
use fedlink_core::{
    storage::{write_atomically, LocalCheckpoint, RoundLog, RoundLogEntry},
    Evaluation,
};

#[derive(Debug, Default)]
struct ChannelState {
    global_model: Option<Vec<u8>>,
    rejected_uploads: u32,
    /// Requests a cancellation while an upload is in flight
    cancel_on_upload: Option<CoordinatorHandle>,
    uploads: Vec<(Url, PathBuf, Vec<(String, String)>)>,
}

#[derive(Debug, Clone, Default)]
struct FakeChannel(Arc<Mutex<ChannelState>>);

impl FakeChannel {
    fn serving(model: &[u8]) -> Self {
        let channel = Self::default();
        channel.0.lock().unwrap().global_model = Some(model.to_vec());
        channel
    }

    fn reject_uploads(self, count: u32) -> Self {
        self.0.lock().unwrap().rejected_uploads = count;
        self
    }

    fn cancel_on_upload(&self, handle: CoordinatorHandle) {
        self.0.lock().unwrap().cancel_on_upload = Some(handle);
    }

    fn uploads(&self) -> Vec<(Url, PathBuf, Vec<(String, String)>)> {
        self.0.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl TransferChannel for FakeChannel {
    async fn download(
        &mut self,
        _url: &Url,
        destination: &Path,
        progress: &mut (dyn FnMut(TransferProgress) + Send),
    ) -> Result<u64, TransferError> {
        let model = self.0.lock().unwrap().global_model.clone();
        match model {
            Some(model) => {
                write_atomically(destination, &model)?;
                let len = model.len() as u64;
                progress(TransferProgress {
                    transferred: len,
                    total: Some(len),
                });
                Ok(len)
            }
            None => Err(TransferError::RemoteUnavailable("no model yet".into())),
        }
    }

    async fn upload(
        &mut self,
        url: &Url,
        file: &Path,
        fields: &[(String, String)],
    ) -> Result<serde_json::Value, TransferError> {
        let mut state = self.0.lock().unwrap();
        if let Some(handle) = &state.cancel_on_upload {
            handle.request_cancel();
        }
        if state.rejected_uploads > 0 {
            state.rejected_uploads -= 1;
            return Err(TransferError::RemoteRejected {
                status: 500,
                body: "boom".into(),
            });
        }
        state
            .uploads
            .push((url.clone(), file.to_path_buf(), fields.to_vec()));
        Ok(json!({ "success": true, "server_response": { "status": "ok" } }))
    }

    async fn current_round(&mut self, _server_url: &Url) -> Result<RoundNumber, TransferError> {
        Ok(1)
    }
}

#[derive(Debug, Error)]
#[error("fake trainer failure")]
struct FakeTrainerError;

#[derive(Debug, Default)]
struct TrainerState {
    loaded: Option<Vec<u8>>,
    epochs: u32,
    reject_weights: bool,
}

#[derive(Debug, Clone, Default)]
struct FakeTrainer(Arc<Mutex<TrainerState>>);

impl FakeTrainer {
    fn rejecting_weights() -> Self {
        let trainer = Self::default();
        trainer.0.lock().unwrap().reject_weights = true;
        trainer
    }
}

impl LocalTrainer for FakeTrainer {
    type Error = FakeTrainerError;

    fn load_state(&mut self, weights: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.0.lock().unwrap();
        if state.reject_weights {
            return Err(FakeTrainerError);
        }
        state.loaded = Some(weights.to_vec());
        Ok(())
    }

    fn save_state(&mut self) -> Result<Vec<u8>, Self::Error> {
        Ok(b"local weights".to_vec())
    }

    fn train_epoch(&mut self) -> Result<f64, Self::Error> {
        self.0.lock().unwrap().epochs += 1;
        Ok(0.5)
    }

    fn evaluate(&mut self, _threshold: f64) -> Result<Evaluation, Self::Error> {
        Ok(Evaluation {
            loss: 0.25,
            metric: 0.75,
        })
    }

    fn dataset_size(&self) -> usize {
        56
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Waiting(u32),
    Ready(RoundNumber),
    Epoch(RoundNumber, u32),
    Checkpoint(RoundNumber),
    UploadFailed(RoundNumber),
    Advanced(RoundNumber, RoundNumber),
    RolledBack(RoundNumber, usize),
}

/// Records notifications, and plays the part of the driver or of the server on demand.
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    handle: Arc<Mutex<Option<CoordinatorHandle>>>,
    cancel_at_epoch: Option<u32>,
    publish_model_at_attempt: Option<(u32, PathBuf)>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Notify for Recorder {
    fn waiting_for_global_model(&mut self, _round: RoundNumber, attempt: u32) {
        self.push(Event::Waiting(attempt));
        if let Some((at, path)) = &self.publish_model_at_attempt {
            if *at == attempt {
                write_atomically(path, b"published global").unwrap();
            }
        }
    }

    fn global_model_ready(&mut self, round: RoundNumber) {
        self.push(Event::Ready(round));
    }

    fn epoch_completed(&mut self, entry: &RoundLogEntry) {
        self.push(Event::Epoch(entry.round, entry.epoch));
        if self.cancel_at_epoch == Some(entry.epoch) {
            if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                handle.request_cancel();
            }
        }
    }

    fn checkpoint_saved(&mut self, checkpoint: &LocalCheckpoint) {
        self.push(Event::Checkpoint(checkpoint.round()));
    }

    fn upload_failed(&mut self, round: RoundNumber, _error: &RoundError) {
        self.push(Event::UploadFailed(round));
    }

    fn round_advanced(&mut self, round: RoundNumber, next_round: RoundNumber) {
        self.push(Event::Advanced(round, next_round));
    }

    fn round_rolled_back(&mut self, round: RoundNumber, removed_rows: usize) {
        self.push(Event::RolledBack(round, removed_rows));
    }
}

fn settings(dir: &Path, with_server: bool) -> CoordinatorSettings {
    CoordinatorSettings {
        endpoints: EndpointSettings {
            server_url: if with_server {
                Some(Url::parse("http://server.test").unwrap())
            } else {
                None
            },
            relay_url: Url::parse("http://relay.test").unwrap(),
        },
        round: RoundSettings {
            epochs_per_round: 3,
            poll_interval: Duration::from_millis(10),
            wait_timeout: None,
            eval_threshold: 0.5,
        },
        storage: StorageSettings {
            global_model_path: dir.join("global_models").join("global_latest.pth"),
            checkpoint_dir: dir.join("client_checkpoints"),
            log_path: dir.join("logs.csv"),
            remove_checkpoint_on_rollback: false,
        },
    }
}

fn coordinator(
    round: RoundNumber,
    settings: &CoordinatorSettings,
    channel: &FakeChannel,
    trainer: &FakeTrainer,
    recorder: &Recorder,
) -> RoundCoordinator {
    let coordinator = RoundCoordinator::new(
        ClientSession::new("c1", round, "cpu"),
        settings.clone(),
        channel.clone(),
        trainer.clone(),
        recorder.clone(),
    );
    *recorder.handle.lock().unwrap() = Some(coordinator.handle());
    coordinator
}

fn rows_of(settings: &CoordinatorSettings, round: RoundNumber) -> usize {
    RoundLog::new(&settings.storage.log_path)
        .read_all()
        .unwrap()
        .iter()
        .filter(|entry| entry.round == round)
        .count()
}

/// Rows of `round`, read as plain text so that malformed lines do not get in the way.
fn raw_rows_of(settings: &CoordinatorSettings, round: RoundNumber) -> usize {
    std::fs::read_to_string(&settings.storage.log_path)
        .unwrap()
        .lines()
        .filter(|line| line.split(',').nth(1) == Some(round.to_string().as_str()))
        .count()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[tokio::test]
async fn test_round_advances() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let channel = FakeChannel::serving(b"global weights");
    let trainer = FakeTrainer::default();
    let recorder = Recorder::default();
    let mut coordinator = coordinator(1, &settings, &channel, &trainer, &recorder);

    let outcome = coordinator.start_round().await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Advanced {
            round: 1,
            next_round: 2,
            server_response: json!({ "success": true, "server_response": { "status": "ok" } }),
        }
    );
    assert_eq!(coordinator.session().current_round(), 2);
    assert_eq!(coordinator.status(), Status::idle(2));
    assert_eq!(rows_of(&settings, 1), 3);

    let trainer_state = trainer.0.lock().unwrap();
    assert_eq!(trainer_state.loaded.as_deref(), Some(&b"global weights"[..]));
    assert_eq!(trainer_state.epochs, 3);

    let checkpoint = settings.storage.checkpoint_dir.join("round_1.pth");
    assert_eq!(std::fs::read(&checkpoint).unwrap(), b"local weights");

    let uploads = channel.uploads();
    assert_eq!(uploads.len(), 1);
    let (url, file, fields) = &uploads[0];
    assert_eq!(url.as_str(), "http://relay.test/api/send-local-model");
    assert_eq!(file, &checkpoint);
    assert_eq!(field(fields, "client_id"), Some("c1"));
    assert_eq!(field(fields, "dataset_size"), Some("56"));
    assert_eq!(field(fields, "cur_round"), Some("1"));
    assert_eq!(field(fields, "federated_server_url"), Some("http://server.test"));

    assert_eq!(
        recorder.events(),
        vec![
            Event::Ready(1),
            Event::Epoch(1, 1),
            Event::Epoch(1, 2),
            Event::Epoch(1, 3),
            Event::Checkpoint(1),
            Event::Advanced(1, 2),
        ]
    );
}

#[tokio::test]
async fn test_consecutive_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let channel = FakeChannel::serving(b"global weights");
    let trainer = FakeTrainer::default();
    let mut coordinator = coordinator(1, &settings, &channel, &trainer, &Recorder::default());

    coordinator.start_round().await.unwrap();
    coordinator.start_round().await.unwrap();

    assert_eq!(coordinator.session().current_round(), 3);
    assert_eq!(rows_of(&settings, 1), 3);
    assert_eq!(rows_of(&settings, 2), 3);
}

#[tokio::test]
async fn test_waits_for_the_global_model() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), false);
    let channel = FakeChannel::default();
    let trainer = FakeTrainer::default();
    let recorder = Recorder {
        publish_model_at_attempt: Some((2, settings.storage.global_model_path.clone())),
        ..Recorder::default()
    };
    let mut coordinator = coordinator(1, &settings, &channel, &trainer, &recorder);

    let outcome = coordinator.start_round().await.unwrap();
    assert!(matches!(outcome, RoundOutcome::Advanced { round: 1, .. }));

    let events = recorder.events();
    assert_eq!(&events[..3], &[Event::Waiting(1), Event::Waiting(2), Event::Ready(1)]);
    assert_eq!(
        trainer.0.lock().unwrap().loaded.as_deref(),
        Some(&b"published global"[..])
    );
}

#[tokio::test]
async fn test_cancel_between_epochs_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let log = RoundLog::new(&settings.storage.log_path);
    log.append(1, 1, 0.9, 0.8, 0.1).unwrap();

    let channel = FakeChannel::serving(b"global weights");
    let trainer = FakeTrainer::default();
    let recorder = Recorder {
        cancel_at_epoch: Some(2),
        ..Recorder::default()
    };
    let mut coordinator = coordinator(2, &settings, &channel, &trainer, &recorder);

    let outcome = coordinator.start_round().await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Cancelled {
            round: 2,
            removed_rows: 2,
        }
    );
    assert_eq!(coordinator.session().current_round(), 2);
    assert_eq!(rows_of(&settings, 2), 0);
    assert_eq!(rows_of(&settings, 1), 1);
    assert_eq!(trainer.0.lock().unwrap().epochs, 2);
    assert!(channel.uploads().is_empty());
    assert_eq!(recorder.events().last(), Some(&Event::RolledBack(2, 2)));

    // the cancellation does not leak into the next round
    recorder.handle.lock().unwrap().take();
    let outcome = coordinator.start_round().await.unwrap();
    assert!(matches!(outcome, RoundOutcome::Advanced { round: 2, .. }));
}

#[tokio::test]
async fn test_cancel_while_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), false);
    settings.round.poll_interval = Duration::from_secs(3600);
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::default(),
        &FakeTrainer::default(),
        &Recorder::default(),
    );
    let handle = coordinator.handle();
    let round = tokio::spawn(async move { coordinator.start_round().await });

    let mut updates = handle.status_updates();
    while updates.borrow().state != RoundState::AwaitingGlobal {
        updates.changed().await.unwrap();
    }
    handle.request_cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), round)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Cancelled {
            round: 1,
            removed_rows: 0,
        }
    );
    assert_eq!(handle.status(), Status::idle(1));
}

#[tokio::test]
async fn test_wait_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), false);
    settings.round.wait_timeout = Some(Duration::from_millis(30));
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::default(),
        &FakeTrainer::default(),
        &Recorder::default(),
    );

    let err = coordinator.start_round().await.unwrap_err();
    assert_eq!(err, RoundError::GlobalModelTimeout(Duration::from_millis(30)));
    assert_eq!(coordinator.status(), Status::idle(1));
}

#[tokio::test]
async fn test_corrupt_global_model() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let trainer = FakeTrainer::rejecting_weights();
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::serving(b"garbage"),
        &trainer,
        &Recorder::default(),
    );

    let err = coordinator.start_round().await.unwrap_err();
    assert!(matches!(err, RoundError::CorruptGlobalModel(_)));
    assert_eq!(coordinator.session().current_round(), 1);
    assert_eq!(trainer.0.lock().unwrap().epochs, 0);
    assert_eq!(coordinator.status(), Status::idle(1));
}

#[tokio::test]
async fn test_failed_upload_parks_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let channel = FakeChannel::serving(b"global weights").reject_uploads(1);
    let trainer = FakeTrainer::default();
    let recorder = Recorder::default();
    let mut coordinator = coordinator(1, &settings, &channel, &trainer, &recorder);

    let outcome = coordinator.start_round().await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::UploadPending {
            round: 1,
            error: RoundError::RemoteRejected {
                status: 500,
                body: "boom".into(),
            },
        }
    );
    assert_eq!(coordinator.session().current_round(), 1);
    assert_eq!(coordinator.pending_upload(), Some(1));
    assert_eq!(coordinator.status().state, RoundState::Uploading);
    assert_eq!(rows_of(&settings, 1), 3);

    assert_eq!(
        coordinator.start_round().await.unwrap_err(),
        RoundError::NotIdle(RoundState::Uploading)
    );
    assert_eq!(
        coordinator.sync_round_from_server(4).unwrap_err(),
        RoundError::NotIdle(RoundState::Uploading)
    );

    let outcome = coordinator.retry_upload().await.unwrap();
    assert!(matches!(
        outcome,
        RoundOutcome::Advanced {
            round: 1,
            next_round: 2,
            ..
        }
    ));
    assert_eq!(trainer.0.lock().unwrap().epochs, 3);
    assert_eq!(channel.uploads().len(), 1);
    assert!(recorder.events().contains(&Event::UploadFailed(1)));
}

#[tokio::test]
async fn test_abandon_parked_round() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::serving(b"global weights").reject_uploads(1),
        &FakeTrainer::default(),
        &Recorder::default(),
    );

    coordinator.start_round().await.unwrap();
    let outcome = coordinator.abandon_round().await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Cancelled {
            round: 1,
            removed_rows: 3,
        }
    );
    assert_eq!(rows_of(&settings, 1), 0);
    assert_eq!(coordinator.session().current_round(), 1);
    assert!(settings.storage.checkpoint_dir.join("round_1.pth").exists());
    assert_eq!(
        coordinator.abandon_round().await.unwrap_err(),
        RoundError::NoPendingUpload
    );
}

#[tokio::test]
async fn test_rollback_can_remove_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(dir.path(), true);
    settings.storage.remove_checkpoint_on_rollback = true;
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::serving(b"global weights").reject_uploads(1),
        &FakeTrainer::default(),
        &Recorder::default(),
    );

    coordinator.start_round().await.unwrap();
    coordinator.abandon_round().await.unwrap();
    assert!(!settings.storage.checkpoint_dir.join("round_1.pth").exists());
}

#[tokio::test]
async fn test_retry_without_pending_upload() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::default(),
        &FakeTrainer::default(),
        &Recorder::default(),
    );
    assert_eq!(
        coordinator.retry_upload().await.unwrap_err(),
        RoundError::NoPendingUpload
    );
}

#[test]
fn test_sync_round_from_server() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let recorder = Recorder::default();
    let mut coordinator = coordinator(
        2,
        &settings,
        &FakeChannel::default(),
        &FakeTrainer::default(),
        &recorder,
    );

    coordinator.sync_round_from_server(5).unwrap();
    assert_eq!(coordinator.session().current_round(), 5);
    assert_eq!(coordinator.handle().status(), Status::idle(5));
    assert!(recorder.events().is_empty());
    assert!(!settings.storage.log_path.exists());
}

#[tokio::test]
async fn test_failed_rollback_is_retried_before_the_next_round() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let log = RoundLog::new(&settings.storage.log_path);
    log.append(1, 1, 0.9, 0.8, 0.1).unwrap();
    let mut content = std::fs::read_to_string(&settings.storage.log_path).unwrap();
    content.push_str("broken\n");
    std::fs::write(&settings.storage.log_path, &content).unwrap();

    let channel = FakeChannel::serving(b"global weights");
    let trainer = FakeTrainer::default();
    let recorder = Recorder {
        cancel_at_epoch: Some(2),
        ..Recorder::default()
    };
    let mut coordinator = coordinator(2, &settings, &channel, &trainer, &recorder);

    let err = coordinator.start_round().await.unwrap_err();
    assert!(matches!(err, RoundError::Storage(_)));
    assert_eq!(coordinator.pending_rollback(), Some(2));
    assert_eq!(coordinator.status(), Status::idle(2));
    assert_eq!(raw_rows_of(&settings, 2), 2);

    // the log is still unreadable, so the round does not start
    recorder.handle.lock().unwrap().take();
    let err = coordinator.start_round().await.unwrap_err();
    assert!(matches!(err, RoundError::Storage(_)));
    assert_eq!(trainer.0.lock().unwrap().epochs, 2);
    assert_eq!(raw_rows_of(&settings, 2), 2);

    let content = std::fs::read_to_string(&settings.storage.log_path).unwrap();
    std::fs::write(&settings.storage.log_path, content.replace("broken\n", "")).unwrap();
    let outcome = coordinator.start_round().await.unwrap();
    assert!(matches!(outcome, RoundOutcome::Advanced { round: 2, .. }));
    assert_eq!(coordinator.pending_rollback(), None);
    assert_eq!(rows_of(&settings, 1), 1);
    assert_eq!(rows_of(&settings, 2), 3);
    assert!(recorder.events().contains(&Event::RolledBack(2, 2)));
}

#[tokio::test]
async fn test_fatal_error_with_failed_rollback_reports_the_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    std::fs::write(
        &settings.storage.log_path,
        "timestamp,round,epoch,train_loss,val_loss,val_metric\nbroken\n",
    )
    .unwrap();
    let mut coordinator = coordinator(
        1,
        &settings,
        &FakeChannel::serving(b"garbage"),
        &FakeTrainer::rejecting_weights(),
        &Recorder::default(),
    );

    let err = coordinator.start_round().await.unwrap_err();
    assert!(matches!(err, RoundError::Storage(_)));
    assert_eq!(coordinator.pending_rollback(), Some(1));
}

#[tokio::test]
async fn test_cancel_during_upload_retry() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let channel = FakeChannel::serving(b"global weights").reject_uploads(2);
    let recorder = Recorder::default();
    let mut coordinator = coordinator(1, &settings, &channel, &FakeTrainer::default(), &recorder);

    let outcome = coordinator.start_round().await.unwrap();
    assert!(matches!(outcome, RoundOutcome::UploadPending { round: 1, .. }));

    channel.cancel_on_upload(coordinator.handle());
    let outcome = coordinator.retry_upload().await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Cancelled {
            round: 1,
            removed_rows: 3,
        }
    );
    assert_eq!(coordinator.pending_upload(), None);
    assert_eq!(coordinator.status(), Status::idle(1));
    assert_eq!(rows_of(&settings, 1), 0);
    assert_eq!(recorder.events().last(), Some(&Event::RolledBack(1, 3)));
}

#[tokio::test]
async fn test_accepted_upload_wins_over_a_late_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let channel = FakeChannel::serving(b"global weights").reject_uploads(1);
    let mut coordinator = coordinator(
        1,
        &settings,
        &channel,
        &FakeTrainer::default(),
        &Recorder::default(),
    );

    coordinator.start_round().await.unwrap();
    channel.cancel_on_upload(coordinator.handle());
    let outcome = coordinator.retry_upload().await.unwrap();
    assert!(matches!(
        outcome,
        RoundOutcome::Advanced {
            round: 1,
            next_round: 2,
            ..
        }
    ));
    assert_eq!(rows_of(&settings, 1), 3);
}

#[test]
fn test_sync_rejects_round_zero() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), true);
    let mut coordinator = coordinator(
        3,
        &settings,
        &FakeChannel::default(),
        &FakeTrainer::default(),
        &Recorder::default(),
    );

    assert_eq!(
        coordinator.sync_round_from_server(0).unwrap_err(),
        RoundError::InvalidRound(0)
    );
    assert_eq!(coordinator.session().current_round(), 3);
}
