use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::trace;

use super::StorageError;

/// A file that is written next to its final destination and only becomes visible there once
/// [`StagedFile::commit`] is called.
///
/// Dropping a staged file without committing it removes the temporary file and leaves whatever
/// was previously at the destination untouched.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedFile {
    /// Stage a new file for `target`, creating the parent directory if needed.
    pub fn new(target: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let target = target.into();
        let dir = parent_dir(&target);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let temp = tempfile::Builder::new()
            .prefix(".fedlink-")
            .suffix(".part")
            .tempfile_in(&dir)
            .map_err(|e| StorageError::io(&dir, e))?;
        Ok(Self { target, temp })
    }

    /// Replace the destination with the staged content.
    pub fn commit(self) -> Result<PathBuf, StorageError> {
        let StagedFile { target, mut temp } = self;
        temp.flush()
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| StorageError::io(&target, e))?;
        temp.persist(&target)
            .map_err(|e| StorageError::io(&target, e.error))?;
        trace!("committed {}", target.display());
        Ok(target)
    }
}

impl Write for StagedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

/// Write `bytes` to `target` such that readers observe either the old or the new content.
pub fn write_atomically(target: impl AsRef<Path>, bytes: &[u8]) -> Result<(), StorageError> {
    let target = target.as_ref();
    let mut staged = StagedFile::new(target)?;
    staged
        .write_all(bytes)
        .map_err(|e| StorageError::io(target, e))?;
    staged.commit().map(|_| ())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
