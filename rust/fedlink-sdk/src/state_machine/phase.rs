use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{PhaseIo, RolledBack, RoundError, TransitionOutcome};
use crate::settings::CoordinatorSettings;
use fedlink_core::{ClientId, ClientSession, RoundNumber};

/// State of the state machine
#[derive(Debug)]
pub struct State<P> {
    /// data specific to the current phase
    pub private: Box<P>,
    /// data common to all the phases
    pub shared: Box<SharedState>,
}

impl<P> State<P> {
    /// Create a new state
    pub fn new(shared: Box<SharedState>, private: Box<P>) -> Self {
        Self { shared, private }
    }
}

/// Represent the state machine in a specific phase
pub struct Phase<P> {
    /// State of the phase.
    pub(crate) state: State<P>,
    /// Opaque client for performing IO tasks: talking with the
    /// relay, running the trainer, writing the log, etc.
    pub(crate) io: PhaseIo,
}

impl<P> std::fmt::Debug for Phase<P>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("state", &self.state)
            .field("io", &"PhaseIo")
            .finish()
    }
}

/// Store for all the data that are common to all the phases of a round
#[derive(Debug, Clone, PartialEq)]
pub struct SharedState {
    /// Identity of the participant, sent along with the checkpoint
    pub client_id: ClientId,
    /// The round this state machine is running. Captured when the round starts so that it can
    /// be rolled back even if the session counter moves.
    pub round: RoundNumber,
    /// Number of local epochs
    pub epochs_per_round: u32,
    /// Threshold handed to the trainer evaluation
    pub eval_threshold: f64,
    /// How long to wait for the global model before giving up
    pub wait_timeout: Option<Duration>,
    /// Whether the round checkpoint is deleted on rollback
    pub remove_checkpoint_on_rollback: bool,
}

impl SharedState {
    pub fn new(session: &ClientSession, settings: &CoordinatorSettings) -> Self {
        Self {
            client_id: session.client_id().clone(),
            round: session.current_round(),
            epochs_per_round: settings.round.epochs_per_round,
            eval_threshold: settings.round.eval_threshold,
            wait_timeout: settings.round.wait_timeout,
            remove_checkpoint_on_rollback: settings.storage.remove_checkpoint_on_rollback,
        }
    }
}

/// A trait that each `Phase<P>` implements. When `Step::step` is called, the phase
/// tries to do a small piece of work.
#[async_trait]
pub trait Step {
    /// Represent an attempt to make progress within a phase. If the step results in a
    /// change in the phase state, the updated state machine is returned as
    /// `TransitionOutcome::Complete`. If no progress can be made, the state machine is
    /// returned unchanged as `TransitionOutcome::Pending`.
    async fn step(mut self) -> TransitionOutcome;
}

impl<P> Phase<P> {
    /// Build a new phase with the given state and io object.
    pub(crate) fn new(state: State<P>, io: PhaseIo) -> Self {
        Phase { state, io }
    }

    /// Move on to the phase holding `private`, keeping the shared state and the io object.
    pub(crate) fn into_phase<Q>(self, private: Q) -> Phase<Q> {
        Phase::new(State::new(self.state.shared, Box::new(private)), self.io)
    }

    /// Abort the round: remove its log rows, optionally its checkpoint, and move to the
    /// rolled back phase. A failed log rewrite is kept in the rolled back phase.
    pub(crate) fn roll_back(mut self, reason: RoundError) -> Phase<RolledBack> {
        let round = self.state.shared.round;
        match &reason {
            RoundError::UserCancelled => info!("rolling back round {}: cancelled by the user", round),
            reason => error!("rolling back round {}: {}", round, reason),
        }

        let removed_rows = self.io.rollback_log(round);
        if self.state.shared.remove_checkpoint_on_rollback {
            if let Err(e) = self.io.remove_checkpoint(round) {
                warn!("failed to remove the checkpoint of round {}: {}", round, e);
            }
        }
        match &removed_rows {
            Ok(removed) => {
                info!("round {} rolled back, {} log rows removed", round, removed);
                self.io.notify_round_rolled_back(round, *removed);
            }
            Err(e) => error!("failed to remove the log rows of round {}: {}", round, e),
        }

        self.into_phase(RolledBack {
            reason,
            removed_rows,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_io_mock<F>(&mut self, f: F)
    where
        F: FnOnce(&mut super::MockIO),
    {
        let mut mock = super::MockIO::new();
        f(&mut mock);
        self.io = Box::new(mock);
    }

    #[cfg(test)]
    pub(crate) fn check_io_mock(&mut self) {
        // dropping the mock forces the checks to run. We replace it
        // by an empty one, so that we detect if a method is called
        // un-expectedly afterwards
        let _ = std::mem::replace(&mut self.io, Box::new(super::MockIO::new()));
    }
}
