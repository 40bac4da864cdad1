use std::path::PathBuf;

use crate::state_machine::{MockIO, Phase, SharedState, State};
use fedlink_core::{storage::LocalCheckpoint, ClientId, RoundNumber};

#[macro_export]
macro_rules! unwrap_as {
    ($e:expr, $p:path) => {
        match $e {
            $p(s) => s,
            x => panic!("Not a {}: {:?}", stringify!($p), x),
        }
    };
}

#[macro_export]
macro_rules! unwrap_step {
    ($phase:expr, complete, $state_machine:tt) => {
        unwrap_step!(
            $phase,
            $crate::state_machine::TransitionOutcome::Complete,
            $state_machine
        )
    };
    ($phase:expr, pending, $state_machine:tt) => {
        unwrap_step!(
            $phase,
            $crate::state_machine::TransitionOutcome::Pending,
            $state_machine
        )
    };
    ($phase:expr, $transition_outcome:path, awaiting_global) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::AwaitingGlobal
        )
    };
    ($phase:expr, $transition_outcome:path, loading_global) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::LoadingGlobal
        )
    };
    ($phase:expr, $transition_outcome:path, local_work) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::LocalWork
        )
    };
    ($phase:expr, $transition_outcome:path, checkpointing) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Checkpointing
        )
    };
    ($phase:expr, $transition_outcome:path, uploading) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Uploading
        )
    };
    ($phase:expr, $transition_outcome:path, advanced) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::Advanced
        )
    };
    ($phase:expr, $transition_outcome:path, rolled_back) => {
        unwrap_step!(
            $phase,
            $transition_outcome,
            $crate::state_machine::StateMachine::RolledBack
        )
    };
    ($phase:expr, $transition_outcome:path, $state_machine:path) => {{
        let x = $crate::unwrap_as!(
            $crate::state_machine::Step::step($phase).await,
            $transition_outcome
        );
        $crate::unwrap_as!(x, $state_machine)
    }};
}

/// Shared state of round 1 for client `c1`, three epochs per round.
pub fn shared_state() -> SharedState {
    SharedState {
        client_id: ClientId::from("c1"),
        round: 1,
        epochs_per_round: 3,
        eval_threshold: 0.5,
        wait_timeout: None,
        remove_checkpoint_on_rollback: false,
    }
}

/// Instantiate a phase with an empty mock.
pub fn make_phase<P>(shared: SharedState, private: P) -> Phase<P> {
    Phase::new(
        State::new(Box::new(shared), Box::new(private)),
        Box::new(MockIO::new()),
    )
}

pub fn checkpoint(round: RoundNumber) -> LocalCheckpoint {
    LocalCheckpoint::new(
        round,
        PathBuf::from("client_checkpoints").join(format!("round_{}.pth", round)),
    )
}
