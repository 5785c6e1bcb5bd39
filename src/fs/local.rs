//! fs::local
//!
//! [`FileSystem`] over the real disk.

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::{FileStat, FileSystem, FsError, FsOp};

/// The local disk.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    case_sensitive: bool,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self {
            case_sensitive: !cfg!(any(target_os = "macos", target_os = "windows")),
        }
    }

    /// Probe case sensitivity by looking up `dir` with its name's case flipped.
    pub fn detect(dir: &Path) -> Self {
        let probed = dir.file_name().and_then(|n| n.to_str()).and_then(|name| {
            let flipped: String = name
                .chars()
                .map(|c| {
                    if c.is_uppercase() {
                        c.to_lowercase().next().unwrap_or(c)
                    } else {
                        c.to_uppercase().next().unwrap_or(c)
                    }
                })
                .collect();
            if flipped == name {
                return None;
            }
            Some(!dir.with_file_name(flipped).exists())
        });
        match probed {
            Some(case_sensitive) => Self { case_sensitive },
            None => Self::new(),
        }
    }
}

impl Default for LocalFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl FileSystem for LocalFileSystem {
    fn stat(&self, location: &Path) -> Option<FileStat> {
        let meta = fs::metadata(location).ok()?;
        Some(FileStat {
            is_directory: meta.is_dir(),
            modified: millis(&meta),
        })
    }

    fn read(&self, location: &Path) -> Result<Vec<u8>, FsError> {
        fs::read(location).map_err(|e| FsError::io(FsOp::Read, location, e))
    }

    fn write(&self, location: &Path, contents: &[u8]) -> Result<(), FsError> {
        fs::write(location, contents).map_err(|e| FsError::io(FsOp::Write, location, e))
    }

    fn mkdir(&self, location: &Path) -> Result<(), FsError> {
        fs::create_dir_all(location).map_err(|e| FsError::io(FsOp::Mkdir, location, e))
    }

    fn list(&self, location: &Path) -> Result<Vec<String>, FsError> {
        if !location.is_dir() {
            return Err(FsError::NotADirectory(location.to_path_buf()));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(location).map_err(|e| FsError::io(FsOp::List, location, e))? {
            let entry = entry.map_err(|e| FsError::io(FsOp::List, location, e))?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, location: &Path) -> Result<(), FsError> {
        let meta = fs::symlink_metadata(location).map_err(|e| FsError::io(FsOp::Delete, location, e))?;
        if meta.is_dir() {
            fs::remove_dir(location).map_err(|e| {
                if e.kind() == std::io::ErrorKind::DirectoryNotEmpty {
                    FsError::DirectoryNotEmpty(location.to_path_buf())
                } else {
                    FsError::io(FsOp::Delete, location, e)
                }
            })
        } else {
            fs::remove_file(location).map_err(|e| FsError::io(FsOp::Delete, location, e))
        }
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| FsError::io(FsOp::Copy, from, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        fs::rename(from, to).map_err(|e| FsError::io(FsOp::Rename, from, e))
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}
