use std::{
    fs,
    path::{Path, PathBuf},
};

use super::StorageError;

/// The single location holding the most recently received global model.
///
/// The slot is only ever replaced atomically, so a present slot always holds a complete download.
#[derive(Debug, Clone)]
pub struct GlobalModelSlot {
    path: PathBuf,
}

impl GlobalModelSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<Vec<u8>, StorageError> {
        fs::read(&self.path).map_err(|e| StorageError::io(&self.path, e))
    }
}
