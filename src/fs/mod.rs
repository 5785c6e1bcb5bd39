//! fs
//!
//! The filesystem adapter the workspace is layered over.
//!
//! # Architecture
//!
//! The core never touches `std::fs` directly. Every byte-level effect goes
//! through a [`FileSystem`] held by the workspace, and only inside an
//! unprotected window. Two adapters ship with the crate:
//!
//! - [`LocalFileSystem`] - the real disk, via `std::fs`
//! - [`MemoryFileSystem`] - an in-memory tree with fault injection, used by
//!   tests to make individual deletes or writes fail
//!
//! Deletion is deliberately non-recursive: the core walks subtrees itself so
//! it can report one failure per child and keep going.
//!
//! Path variables used by linked resources are resolved through
//! [`PathVariables`].

pub mod local;
pub mod memory;
pub mod variables;

pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
pub use variables::{PathVariableResolver, PathVariables};

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from a filesystem adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(PathBuf),

    #[error("{op} failed for {path}: {message}")]
    Io {
        op: FsOp,
        path: PathBuf,
        message: String,
    },
}

impl FsError {
    pub(crate) fn io(op: FsOp, path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_path_buf()),
            _ => FsError::Io {
                op,
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }
}

/// Adapter operations, used in errors and for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Read,
    Write,
    Mkdir,
    List,
    Delete,
    Copy,
    Rename,
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsOp::Read => "read",
            FsOp::Write => "write",
            FsOp::Mkdir => "mkdir",
            FsOp::List => "list",
            FsOp::Delete => "delete",
            FsOp::Copy => "copy",
            FsOp::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// What a location holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_directory: bool,
    /// Last modification time in milliseconds since the epoch.
    pub modified: i64,
}

/// A byte-level storage backend.
pub trait FileSystem: Send + Sync {
    /// `None` when nothing exists at `location`.
    fn stat(&self, location: &Path) -> Option<FileStat>;

    fn exists(&self, location: &Path) -> bool {
        self.stat(location).is_some()
    }

    fn is_directory(&self, location: &Path) -> bool {
        self.stat(location).is_some_and(|s| s.is_directory)
    }

    fn read(&self, location: &Path) -> Result<Vec<u8>, FsError>;

    /// Create or overwrite a file. The parent directory must exist.
    fn write(&self, location: &Path, contents: &[u8]) -> Result<(), FsError>;

    /// Create a directory and any missing ancestors.
    fn mkdir(&self, location: &Path) -> Result<(), FsError>;

    /// Names of the entries of a directory, sorted.
    fn list(&self, location: &Path) -> Result<Vec<String>, FsError>;

    /// Remove a file or an empty directory.
    fn delete(&self, location: &Path) -> Result<(), FsError>;

    /// Copy one file.
    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    /// Move a file or directory.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError>;

    fn is_case_sensitive(&self) -> bool;
}

/// Remove `location` and everything below it, children first.
pub fn remove_tree(fs: &dyn FileSystem, location: &Path) -> Result<(), FsError> {
    if fs.is_directory(location) {
        for name in fs.list(location)? {
            remove_tree(fs, &location.join(name))?;
        }
    }
    fs.delete(location)
}

/// Copy a file or a whole directory tree.
pub fn copy_tree(fs: &dyn FileSystem, from: &Path, to: &Path) -> Result<(), FsError> {
    if fs.is_directory(from) {
        fs.mkdir(to)?;
        for name in fs.list(from)? {
            copy_tree(fs, &from.join(&name), &to.join(&name))?;
        }
        Ok(())
    } else {
        fs.copy_file(from, to)
    }
}
