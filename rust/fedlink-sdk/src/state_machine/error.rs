use std::time::Duration;

use thiserror::Error;

use super::RoundState;
use crate::client::TransferError;
use fedlink_core::{storage::StorageError, RoundNumber};

/// Why a round could not make progress.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoundError {
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("upload rejected with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("transfer interrupted: {0}")]
    TransferInterrupted(String),

    #[error("corrupt global model: {0}")]
    CorruptGlobalModel(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("round cancelled by the user")]
    UserCancelled,

    #[error("no global model after waiting {0:?}")]
    GlobalModelTimeout(Duration),

    #[error("local training failed: {0}")]
    Training(String),

    #[error("the coordinator is busy ({0})")]
    NotIdle(RoundState),

    #[error("no upload is pending")]
    NoPendingUpload,

    #[error("invalid round number {0}, rounds start at 1")]
    InvalidRound(RoundNumber),
}

impl RoundError {
    /// Whether the error comes from a remote endpoint and may go away on its own.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RoundError::RemoteUnavailable(_)
                | RoundError::RemoteRejected { .. }
                | RoundError::TransferInterrupted(_)
        )
    }
}

impl From<TransferError> for RoundError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::RemoteUnavailable(msg) => Self::RemoteUnavailable(msg),
            TransferError::RemoteRejected { status, body } => Self::RemoteRejected { status, body },
            TransferError::TransferInterrupted(msg) => Self::TransferInterrupted(msg),
            TransferError::Deserialize(msg) => Self::RemoteUnavailable(msg),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<StorageError> for RoundError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}
