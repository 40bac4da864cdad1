//! The driver facing side of the round state machine.

use std::sync::{Arc, Mutex};

use tokio::{sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    settings::CoordinatorSettings,
    state_machine::{
        boxed_io,
        Advanced,
        Phase,
        PhaseIo,
        RolledBack,
        RoundError,
        RoundState,
        SharedState,
        StateMachine,
        TransitionOutcome,
        Uploading,
    },
    LocalTrainer,
    Notify,
    TransferChannel,
};
use fedlink_core::{ClientSession, RoundNumber};

#[cfg(test)]
mod tests;

/// A snapshot of what the coordinator is doing.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: RoundState,
    /// The round in progress, or the next round to run when idle
    pub round: RoundNumber,
    /// Epochs completed in the round, once local work has started
    pub completed_epochs: Option<u32>,
}

impl Status {
    fn idle(round: RoundNumber) -> Self {
        Self {
            state: RoundState::Idle,
            round,
            completed_epochs: None,
        }
    }

    fn of(machine: &StateMachine) -> Self {
        Self {
            state: machine.state(),
            round: machine.round(),
            completed_epochs: machine.completed_epochs(),
        }
    }
}

/// How a round ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The server accepted the checkpoint and the session moved to `next_round`.
    Advanced {
        round: RoundNumber,
        next_round: RoundNumber,
        server_response: serde_json::Value,
    },
    /// Local work is done but the checkpoint could not be delivered. The round is parked until
    /// [`RoundCoordinator::retry_upload`] or [`RoundCoordinator::abandon_round`] is called.
    UploadPending { round: RoundNumber, error: RoundError },
    /// The round was cancelled and its log rows removed.
    Cancelled {
        round: RoundNumber,
        removed_rows: usize,
    },
}

fn current_token(cancel: &Mutex<CancellationToken>) -> CancellationToken {
    cancel
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// A cloneable handle to observe and cancel the round of a [`RoundCoordinator`] from another task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    cancel: Arc<Mutex<CancellationToken>>,
    status: watch::Receiver<Status>,
}

impl CoordinatorHandle {
    /// Ask the running round to stop. The request is observed at the next phase boundary, or
    /// immediately while waiting for the global model, and the round is rolled back.
    pub fn request_cancel(&self) {
        info!("cancellation requested");
        current_token(&self.cancel).cancel();
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    pub fn status_updates(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }
}

/// Runs the rounds of a participant.
///
/// The coordinator owns the [`ClientSession`] and runs one round at a time: starting a round
/// while another one is running or parked is refused with [`RoundError::NotIdle`]. The round
/// counter only moves forward when the server accepted the checkpoint of the round, or when it
/// is explicitly re-aligned with [`RoundCoordinator::sync_round_from_server`].
pub struct RoundCoordinator {
    session: ClientSession,
    settings: CoordinatorSettings,
    /// `None` while a round is running or parked
    io: Option<PhaseIo>,
    /// A round whose upload failed
    parked: Option<StateMachine>,
    /// A round whose log rows could not be removed
    pending_rollback: Option<RoundNumber>,
    cancel: Arc<Mutex<CancellationToken>>,
    status_tx: watch::Sender<Status>,
    status_rx: watch::Receiver<Status>,
}

impl RoundCoordinator {
    /// Instantiate a coordinator.
    ///
    /// # Args
    ///
    /// - `session`: the participant identity and the round to start from
    /// - `settings`: round, endpoint and storage settings
    /// - `channel`: moves the global model and the checkpoints
    /// - `trainer`: the local machine learning side
    /// - `notifier`: a type that the coordinator can use to emit notifications
    pub fn new<C, T, N>(
        session: ClientSession,
        settings: CoordinatorSettings,
        channel: C,
        trainer: T,
        notifier: N,
    ) -> Self
    where
        C: TransferChannel + Send + 'static,
        T: LocalTrainer + Send + 'static,
        N: Notify + Send + 'static,
    {
        let io = boxed_io(channel, trainer, notifier, &settings);
        let (status_tx, status_rx) = watch::channel(Status::idle(session.current_round()));
        Self {
            session,
            settings,
            io: Some(io),
            parked: None,
            pending_rollback: None,
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            status_tx,
            status_rx,
        }
    }

    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle {
            cancel: Arc::clone(&self.cancel),
            status: self.status_rx.clone(),
        }
    }

    pub fn status(&self) -> Status {
        self.status_rx.borrow().clone()
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// The round whose upload is waiting to be retried, if any.
    pub fn pending_upload(&self) -> Option<RoundNumber> {
        self.parked.as_ref().map(StateMachine::round)
    }

    /// The round whose log rows are still waiting to be removed, if any.
    pub fn pending_rollback(&self) -> Option<RoundNumber> {
        self.pending_rollback
    }

    /// Run the current round until it is advanced, parked or rolled back.
    ///
    /// # Errors
    /// Fails with [`RoundError::NotIdle`] if a round is running or parked. Fatal round errors are
    /// returned after the round has been rolled back. If the log rows of the round cannot be
    /// removed, the [`RoundError::Storage`] error is returned instead and the rollback is retried
    /// before the next round starts.
    pub async fn start_round(&mut self) -> Result<RoundOutcome, RoundError> {
        let mut io = self.take_io()?;
        if let Err(e) = self.finish_rollback(&mut io) {
            self.io = Some(io);
            return Err(e);
        }
        let token = self.reset_cancellation();
        info!("starting round {}", self.session.current_round());
        let shared = SharedState::new(&self.session, &self.settings);
        self.drive(StateMachine::new(shared, io), token).await
    }

    /// Retry the upload of a parked round, without redoing its local work.
    pub async fn retry_upload(&mut self) -> Result<RoundOutcome, RoundError> {
        let machine = self.parked.take().ok_or(RoundError::NoPendingUpload)?;
        let token = self.reset_cancellation();
        info!("retrying the upload of round {}", machine.round());
        self.drive(machine, token).await
    }

    /// Give up a parked round and roll it back.
    pub async fn abandon_round(&mut self) -> Result<RoundOutcome, RoundError> {
        let machine = self.parked.take().ok_or(RoundError::NoPendingUpload)?;
        let token = self.reset_cancellation();
        info!("abandoning round {}", machine.round());
        self.drive(machine.roll_back(RoundError::UserCancelled), token)
            .await
    }

    /// Overwrite the round counter with the one published by the server. Only allowed while
    /// idle.
    pub fn sync_round_from_server(&mut self, remote_round: RoundNumber) -> Result<(), RoundError> {
        if self.io.is_none() || self.parked.is_some() {
            return Err(RoundError::NotIdle(self.status().state));
        }
        if remote_round == 0 {
            return Err(RoundError::InvalidRound(remote_round));
        }
        let local_round = self.session.current_round();
        if local_round != remote_round {
            info!(
                "re-aligning the round counter from {} to {}",
                local_round, remote_round
            );
        }
        self.session.realign(remote_round);
        self.publish_idle();
        Ok(())
    }

    /// Remove the log rows of a round whose rollback failed.
    fn finish_rollback(&mut self, io: &mut PhaseIo) -> Result<(), RoundError> {
        if let Some(round) = self.pending_rollback {
            info!("retrying the rollback of round {}", round);
            let removed = io.rollback_log(round)?;
            self.pending_rollback = None;
            info!("round {} rolled back, {} log rows removed", round, removed);
            io.notify_round_rolled_back(round, removed);
        }
        Ok(())
    }

    fn take_io(&mut self) -> Result<PhaseIo, RoundError> {
        if self.parked.is_some() {
            return Err(RoundError::NotIdle(RoundState::Uploading));
        }
        let state = self.status().state;
        self.io.take().ok_or(RoundError::NotIdle(state))
    }

    /// Install a fresh token so that a cancellation requested for a previous round does not leak
    /// into the next one.
    fn reset_cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        token
    }

    async fn drive(
        &mut self,
        mut machine: StateMachine,
        token: CancellationToken,
    ) -> Result<RoundOutcome, RoundError> {
        loop {
            self.publish(&machine);
            machine = match machine {
                StateMachine::Advanced(phase) => return Ok(self.advance(phase)),
                StateMachine::RolledBack(phase) => return self.rolled_back(phase),
                machine => machine,
            };

            if token.is_cancelled() {
                machine = machine.roll_back(RoundError::UserCancelled);
                continue;
            }

            machine = match machine.transition().await {
                TransitionOutcome::Complete(machine) => machine,
                TransitionOutcome::Pending(StateMachine::Uploading(phase))
                    if !token.is_cancelled() =>
                {
                    return Ok(self.park(phase));
                }
                TransitionOutcome::Pending(StateMachine::Uploading(phase)) => {
                    debug!("cancellation requested while uploading");
                    phase.into()
                }
                TransitionOutcome::Pending(machine) => {
                    tokio::select! {
                        _ = sleep(self.settings.round.poll_interval) => {}
                        _ = token.cancelled() => debug!("cancellation requested while waiting"),
                    }
                    machine
                }
            };
        }
    }

    fn advance(&mut self, phase: Phase<Advanced>) -> RoundOutcome {
        let Phase { state, io } = phase;
        self.io = Some(io);
        let round = state.shared.round;
        let next_round = self.session.advance();
        info!("round {} done, moving to round {}", round, next_round);
        self.publish_idle();
        RoundOutcome::Advanced {
            round,
            next_round,
            server_response: state.private.response,
        }
    }

    fn rolled_back(&mut self, phase: Phase<RolledBack>) -> Result<RoundOutcome, RoundError> {
        let Phase { state, io } = phase;
        self.io = Some(io);
        self.publish_idle();
        let round = state.shared.round;
        let RolledBack {
            reason,
            removed_rows,
        } = *state.private;
        let removed_rows = match removed_rows {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    "the log rows of round {} are kept until the rollback is retried",
                    round
                );
                self.pending_rollback = Some(round);
                return Err(e);
            }
        };
        match reason {
            RoundError::UserCancelled => Ok(RoundOutcome::Cancelled {
                round,
                removed_rows,
            }),
            e => Err(e),
        }
    }

    fn park(&mut self, phase: Phase<Uploading>) -> RoundOutcome {
        let round = phase.state.shared.round;
        let error = phase
            .state
            .private
            .last_error
            .clone()
            .unwrap_or_else(|| RoundError::RemoteUnavailable("upload failed".to_string()));
        warn!(
            "upload of round {} failed, the round is kept until the upload is retried or abandoned",
            round
        );
        let machine = StateMachine::from(phase);
        self.publish(&machine);
        self.parked = Some(machine);
        RoundOutcome::UploadPending { round, error }
    }

    fn publish(&self, machine: &StateMachine) {
        let _ = self.status_tx.send(Status::of(machine));
    }

    fn publish_idle(&self) {
        let _ = self
            .status_tx
            .send(Status::idle(self.session.current_round()));
    }
}
