use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::{write_atomically, StorageError};
use crate::common::RoundNumber;

/// The weights produced by local training for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCheckpoint {
    round: RoundNumber,
    path: PathBuf,
}

impl LocalCheckpoint {
    pub fn new(round: RoundNumber, path: impl Into<PathBuf>) -> Self {
        Self {
            round,
            path: path.into(),
        }
    }

    pub fn round(&self) -> RoundNumber {
        self.round
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A directory of per-round checkpoints named `round_{N}.pth`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, round: RoundNumber) -> PathBuf {
        self.dir.join(format!("round_{}.pth", round))
    }

    /// Persist the weights of `round`, replacing an older checkpoint of the same round.
    pub fn write(&self, round: RoundNumber, weights: &[u8]) -> Result<LocalCheckpoint, StorageError> {
        let path = self.path_for(round);
        write_atomically(&path, weights)?;
        debug!("checkpoint of round {} written to {}", round, path.display());
        Ok(LocalCheckpoint { round, path })
    }

    pub fn get(&self, round: RoundNumber) -> Option<LocalCheckpoint> {
        let path = self.path_for(round);
        if path.is_file() {
            Some(LocalCheckpoint { round, path })
        } else {
            None
        }
    }

    /// Delete the checkpoint of `round`. Returns `false` if there was none.
    pub fn remove(&self, round: RoundNumber) -> Result<bool, StorageError> {
        let path = self.path_for(round);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }
}
