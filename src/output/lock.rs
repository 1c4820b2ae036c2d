//! Advisory lock on an output directory
//!
//! Two exports writing into the same directory would race on artifact
//! creation. Holding an exclusive fd-lock on a lock file inside the directory
//! for the duration of the run turns that race into an immediate error.

use super::{OutputError, OutputResult};
use crate::downloader::config::LOCK_FILE_NAME;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output directory lock wrapper
///
/// The lock lives as long as the underlying file handle; dropping this value
/// closes the handle and releases the lock.
pub struct OutputLock {
    #[allow(dead_code)]
    lock: RwLock<File>,
    path: PathBuf,
}

impl OutputLock {
    /// Try to lock `dir` without blocking, creating it if needed
    ///
    /// # Errors
    /// [`OutputError::LockError`] when another process holds the lock.
    pub fn try_acquire(dir: &Path) -> OutputResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| OutputError::IoError(e.to_string()))?;

        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| OutputError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            OutputError::LockError(format!(
                "{} is in use by another export: {e}",
                dir.display()
            ))
        })?;
        // Keep the OS lock for as long as the file handle stays open
        std::mem::forget(guard);

        debug!(path = %path.display(), "Acquired output directory lock");
        Ok(Self { lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
