//! Exclusive advisory locking of the log file.

use std::fs::File;
use std::io;

use fs2::FileExt;
use tracing::{trace, warn};

/// A file held under an exclusive advisory lock.
///
/// The lock is released when the guard is dropped, on every exit path.
/// Acquisition blocks until any other holder lets go.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
}

impl LockedFile {
    /// Block until the exclusive lock on `file` is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn acquire(file: File) -> io::Result<Self> {
        FileExt::lock_exclusive(&file)?;
        trace!("exclusive lock acquired");
        Ok(Self { file })
    }

    /// The locked file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => trace!("exclusive lock released"),
            // Closing the descriptor releases the lock anyway
            Err(err) => warn!("failed to release log lock: {err}"),
        }
    }
}
