//! core::ops::lock
//!
//! Cross-process exclusive lock on a workspace directory.
//!
//! # Architecture
//!
//! The in-process [`LockManager`](super::work::LockManager) serializes
//! threads. This lock keeps a second process from opening the same
//! workspace root for mutation at the same time. It is taken when a
//! workspace is opened on the local filesystem and held for the
//! workspace's lifetime.
//!
//! # Storage
//!
//! - `<root>/.canopy/lock` - Lock file with OS-level exclusive lock
//!
//! # Invariants
//!
//! - Lock is automatically released on drop (RAII pattern)
//! - Lock acquisition is non-blocking (fails fast if locked)

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::WorkspacePaths;

/// Errors from the cross-process lock.
#[derive(Debug, Error)]
pub enum WorkspaceLockError {
    /// Another process already holds the lock.
    #[error("workspace is locked by another process")]
    AlreadyLocked,

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on a workspace root, released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    file: Option<File>,
}

impl WorkspaceLock {
    /// Attempt to acquire the lock without blocking.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceLockError::AlreadyLocked`] if another process holds it
    /// - [`WorkspaceLockError::CreateFailed`] if the lock file cannot be created
    /// - [`WorkspaceLockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(paths: &WorkspacePaths) -> Result<Self, WorkspaceLockError> {
        paths.ensure_dirs().map_err(|e| {
            WorkspaceLockError::CreateFailed(format!(
                "cannot create {}: {}",
                paths.metadata_dir().display(),
                e
            ))
        })?;

        let path = paths.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                WorkspaceLockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                log::debug!("workspace lock acquired at {}", path.display());
                Ok(Self {
                    path,
                    file: Some(file),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(WorkspaceLockError::AlreadyLocked)
            }
            Err(e) => Err(WorkspaceLockError::AcquireFailed(e.to_string())),
        }
    }

    /// Try to acquire the lock, returning `None` if another process holds it.
    pub fn try_acquire(paths: &WorkspacePaths) -> Result<Option<Self>, WorkspaceLockError> {
        match Self::acquire(paths) {
            Ok(lock) => Ok(Some(lock)),
            Err(WorkspaceLockError::AlreadyLocked) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before drop.
    pub fn release(&mut self) -> Result<(), WorkspaceLockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| WorkspaceLockError::ReleaseFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(temp: &TempDir) -> WorkspacePaths {
        WorkspacePaths::new(temp.path().to_path_buf())
    }

    #[test]
    fn acquire_creates_metadata_dir() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = paths(&temp);
        assert!(!paths.metadata_dir().exists());

        let lock = WorkspaceLock::acquire(&paths).expect("acquire lock");
        assert!(lock.is_held());
        assert_eq!(lock.path(), paths.lock_path());
        assert!(paths.metadata_dir().exists());
    }

    #[test]
    fn second_acquire_fails() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = paths(&temp);

        let _lock = WorkspaceLock::acquire(&paths).expect("first acquire");
        let result = WorkspaceLock::acquire(&paths);
        assert!(matches!(result, Err(WorkspaceLockError::AlreadyLocked)));
        assert!(WorkspaceLock::try_acquire(&paths)
            .expect("try_acquire")
            .is_none());
    }

    #[test]
    fn released_on_drop() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = paths(&temp);
        {
            let _lock = WorkspaceLock::acquire(&paths).expect("first acquire");
        }
        let lock = WorkspaceLock::acquire(&paths).expect("second acquire");
        assert!(lock.is_held());
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = paths(&temp);

        let mut lock = WorkspaceLock::acquire(&paths).expect("acquire");
        lock.release().expect("first release");
        lock.release().expect("second release");
        assert!(!lock.is_held());
        assert!(WorkspaceLock::acquire(&paths).is_ok());
    }
}
