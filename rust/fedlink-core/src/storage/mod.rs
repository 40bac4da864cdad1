//! Local persistence of a participant: the metric log, the global model slot and the local
//! checkpoints.

mod checkpoint;
mod model_slot;
mod round_log;
mod staged;

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub use self::{
    checkpoint::{CheckpointStore, LocalCheckpoint},
    model_slot::GlobalModelSlot,
    round_log::{RoundLog, RoundLogEntry, RoundSummary, LOG_HEADER},
    staged::{write_atomically, StagedFile},
};

#[derive(Debug, Error)]
/// Errors of the local storage.
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed round log {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
