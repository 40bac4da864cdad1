//! The round state machine.
//!
//! A round goes through the following phases:
//!
//! ```text
//! AwaitingGlobal -> LoadingGlobal -> LocalWork -> Checkpointing -> Uploading -> Advanced
//! ```
//!
//! Any phase but the last one can end in `RolledBack`, either because of a fatal error or because
//! the driver cancelled the round. Each call to [`StateMachine::transition`] does a small piece of
//! work, which gives the driver a chance to observe cancellation between steps.

mod error;
mod io;
mod phase;
mod phases;
#[allow(clippy::module_inception)]
mod state_machine;
#[cfg(test)]
pub(crate) mod tests;

// It is useful to re-export everything within this module because
// there are lot of interdependencies between all the sub-modules
#[cfg(test)]
use self::io::MockIO;
pub(crate) use self::io::{boxed_io, PhaseIo};
pub use self::{
    error::RoundError,
    io::PassiveNotifier,
    phase::{Phase, SharedState, State, Step},
    phases::{Advanced, AwaitingGlobal, Checkpointing, LoadingGlobal, LocalWork, RolledBack, Uploading},
    state_machine::{RoundState, StateMachine, TransitionOutcome},
};
