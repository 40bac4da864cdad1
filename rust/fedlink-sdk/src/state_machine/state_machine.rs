use derive_more::{Display, From};

use super::{
    AwaitingGlobal,
    Checkpointing,
    LoadingGlobal,
    LocalWork,
    Phase,
    PhaseIo,
    RoundError,
    SharedState,
    State,
    Step,
    Uploading,
};
use super::{Advanced, RolledBack};
use fedlink_core::RoundNumber;

/// Outcome of a state machine transition attempt.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// Outcome when the state machine cannot make immediate progress. The state machine
    /// is returned unchanged.
    Pending(StateMachine),
    /// Outcome when a transition occured and the state machine was updated.
    Complete(StateMachine),
}

/// The lifecycle state of a round, as reported to the driver.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    #[display(fmt = "idle")]
    Idle,
    #[display(fmt = "awaiting global model")]
    AwaitingGlobal,
    #[display(fmt = "loading global model")]
    LoadingGlobal,
    #[display(fmt = "local work")]
    LocalWork,
    #[display(fmt = "checkpointing")]
    Checkpointing,
    #[display(fmt = "uploading")]
    Uploading,
    #[display(fmt = "advanced")]
    Advanced,
    #[display(fmt = "rolled back")]
    RolledBack,
}

/// Round state machine.
#[derive(From)]
pub enum StateMachine {
    /// Round state machine in the "awaiting global model" phase
    AwaitingGlobal(Phase<AwaitingGlobal>),
    /// Round state machine in the "loading global model" phase
    LoadingGlobal(Phase<LoadingGlobal>),
    /// Round state machine in the "local work" phase
    LocalWork(Phase<LocalWork>),
    /// Round state machine in the "checkpointing" phase
    Checkpointing(Phase<Checkpointing>),
    /// Round state machine in the "uploading" phase
    Uploading(Phase<Uploading>),
    /// Round state machine after the checkpoint was accepted
    Advanced(Phase<Advanced>),
    /// Round state machine after the round was aborted
    RolledBack(Phase<RolledBack>),
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateMachine::AwaitingGlobal(phase) => {
                f.debug_tuple("AwaitingGlobal").field(phase).finish()
            }
            StateMachine::LoadingGlobal(phase) => {
                f.debug_tuple("LoadingGlobal").field(phase).finish()
            }
            StateMachine::LocalWork(phase) => {
                f.debug_tuple("LocalWork").field(phase).finish()
            }
            StateMachine::Checkpointing(phase) => {
                f.debug_tuple("Checkpointing").field(phase).finish()
            }
            StateMachine::Uploading(phase) => {
                f.debug_tuple("Uploading").field(phase).finish()
            }
            StateMachine::Advanced(phase) => {
                f.debug_tuple("Advanced").field(phase).finish()
            }
            StateMachine::RolledBack(phase) => {
                f.debug_tuple("RolledBack").field(phase).finish()
            }
        }
    }
}

impl StateMachine {
    /// Instantiate a state machine for the round described by `shared`, waiting for its global
    /// model.
    pub(crate) fn new(shared: SharedState, io: PhaseIo) -> Self {
        Phase::new(
            State::new(Box::new(shared), Box::new(AwaitingGlobal::new())),
            io,
        )
        .into()
    }

    /// Try to make progress in the round
    pub async fn transition(self) -> TransitionOutcome {
        match self {
            StateMachine::AwaitingGlobal(phase) => phase.step().await,
            StateMachine::LoadingGlobal(phase) => phase.step().await,
            StateMachine::LocalWork(phase) => phase.step().await,
            StateMachine::Checkpointing(phase) => phase.step().await,
            StateMachine::Uploading(phase) => phase.step().await,
            StateMachine::Advanced(phase) => phase.step().await,
            StateMachine::RolledBack(phase) => phase.step().await,
        }
    }

    /// Abort the round. A state machine that already reached a terminal phase is returned as is.
    pub fn roll_back(self, reason: RoundError) -> Self {
        match self {
            StateMachine::AwaitingGlobal(phase) => phase.roll_back(reason).into(),
            StateMachine::LoadingGlobal(phase) => phase.roll_back(reason).into(),
            StateMachine::LocalWork(phase) => phase.roll_back(reason).into(),
            StateMachine::Checkpointing(phase) => phase.roll_back(reason).into(),
            StateMachine::Uploading(phase) => phase.roll_back(reason).into(),
            terminal => terminal,
        }
    }

    pub fn state(&self) -> RoundState {
        match self {
            StateMachine::AwaitingGlobal(_) => RoundState::AwaitingGlobal,
            StateMachine::LoadingGlobal(_) => RoundState::LoadingGlobal,
            StateMachine::LocalWork(_) => RoundState::LocalWork,
            StateMachine::Checkpointing(_) => RoundState::Checkpointing,
            StateMachine::Uploading(_) => RoundState::Uploading,
            StateMachine::Advanced(_) => RoundState::Advanced,
            StateMachine::RolledBack(_) => RoundState::RolledBack,
        }
    }

    /// The round this state machine is running.
    pub fn round(&self) -> RoundNumber {
        self.shared().round
    }

    /// The number of epochs completed in this round, while local work is running or done. A
    /// rolled back round has no completed epochs.
    pub fn completed_epochs(&self) -> Option<u32> {
        match self {
            StateMachine::AwaitingGlobal(_)
            | StateMachine::LoadingGlobal(_)
            | StateMachine::RolledBack(_) => None,
            StateMachine::LocalWork(phase) => Some(phase.state.private.completed),
            StateMachine::Checkpointing(_)
            | StateMachine::Uploading(_)
            | StateMachine::Advanced(_) => Some(self.shared().epochs_per_round),
        }
    }

    fn shared(&self) -> &SharedState {
        match self {
            StateMachine::AwaitingGlobal(phase) => &phase.state.shared,
            StateMachine::LoadingGlobal(phase) => &phase.state.shared,
            StateMachine::LocalWork(phase) => &phase.state.shared,
            StateMachine::Checkpointing(phase) => &phase.state.shared,
            StateMachine::Uploading(phase) => &phase.state.shared,
            StateMachine::Advanced(phase) => &phase.state.shared,
            StateMachine::RolledBack(phase) => &phase.state.shared,
        }
    }
}
