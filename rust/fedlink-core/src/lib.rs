//! Shared building blocks for fedlink participants.
//!
//! A fedlink participant takes part in a round-based federated learning protocol: in every round
//! it waits for the global model published by the federated server, trains it locally for a few
//! epochs, writes a checkpoint and sends it back through a relay.
//!
//! This crate holds the pieces that do not depend on any network stack:
//!
//! - [`ClientSession`]: the participant identity and its round counter
//! - [`storage::RoundLog`]: the CSV metric history, with per-round rollback
//! - [`storage::GlobalModelSlot`]: the single "latest global model" file
//! - [`storage::CheckpointStore`]: the per-round local checkpoints
//! - [`storage::StagedFile`]: the temporary-file-then-rename primitive all of the above use so that
//!   readers never observe a partially written file
//!
//! The round state machine itself lives in the `fedlink-sdk` crate.

pub mod common;
pub mod settings;
pub mod storage;

pub use self::common::{ClientId, ClientSession, Evaluation, RoundNumber};
