//! This crate provides the building blocks for running a participant of a round-based
//! federated learning protocol.
//!
//! In every round, a participant:
//!
//! 1. waits for the global model published by the federated server
//! 2. loads it into its local model
//! 3. trains the local model for a few epochs, logging the metrics of each epoch
//! 4. writes the resulting weights to a checkpoint
//! 5. sends the checkpoint to the server through a relay
//!
//! and then moves on to the next round. A round that is cancelled, or that fails for any other
//! reason than a failed upload, is rolled back: its rows are removed from the round log and the
//! round counter is left untouched.
//!
//! # Running a participant
//!
//! The [`RoundCoordinator`] runs the rounds. It is built from three parts provided by the
//! participant:
//!
//! - a [`TransferChannel`] moving model bytes, typically an [`HttpChannel`]
//! - a [`LocalTrainer`] doing the actual machine learning
//! - a [`Notify`] implementation that is told about the progress of the round
//!
//! Each round is driven by [`RoundCoordinator::start_round`]. Since a round can take a long time,
//! the coordinator is usually moved to its own task, and a [`CoordinatorHandle`] is kept around to
//! observe its status and to cancel the round. Cancellation is cooperative: it is observed between
//! two steps of the round (e.g. between two epochs) and while waiting for the global model, never
//! in the middle of a trainer call.
//!
//! A failed upload does not roll the round back: local work is kept and the round is parked until
//! [`RoundCoordinator::retry_upload`] or [`RoundCoordinator::abandon_round`] is called.

pub mod client;
mod coordinator;
pub mod settings;
pub mod state_machine;
mod traits;

pub use self::{
    client::{HttpChannel, TransferError},
    coordinator::{CoordinatorHandle, RoundCoordinator, RoundOutcome, Status},
    state_machine::{PassiveNotifier, RoundError, RoundState},
    traits::{EpochMetrics, LocalTrainer, Notify, TransferChannel, TransferProgress},
};
