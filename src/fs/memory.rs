//! fs::memory
//!
//! An in-memory [`FileSystem`] with fault injection.
//!
//! Locations are absolute paths. The root `/` always exists. A logical
//! clock stands in for modification times: every write bumps it, so
//! "modified since last sync" checks are deterministic in tests.
//!
//! # Fault injection
//!
//! [`MemoryFileSystem::fail_on`] makes one operation fail at one location
//! until [`MemoryFileSystem::clear_faults`] is called:
//!
//! ```
//! use canopy::fs::{FileSystem, FsOp, MemoryFileSystem};
//! use std::path::Path;
//!
//! let fs = MemoryFileSystem::new();
//! fs.write(Path::new("/a.txt"), b"x").unwrap();
//! fs.fail_on(FsOp::Delete, "/a.txt");
//! assert!(fs.delete(Path::new("/a.txt")).is_err());
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{FileStat, FileSystem, FsError, FsOp};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    /// The path as first created, preserving case.
    name: PathBuf,
    node: Node,
    modified: i64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    faults: HashSet<(FsOp, String)>,
}

/// In-memory filesystem.
#[derive(Debug)]
pub struct MemoryFileSystem {
    state: Mutex<State>,
    clock: AtomicI64,
    case_sensitive: bool,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::with_case_sensitivity(true)
    }

    /// A filesystem that folds case when looking names up.
    pub fn case_insensitive() -> Self {
        Self::with_case_sensitivity(false)
    }

    fn with_case_sensitivity(case_sensitive: bool) -> Self {
        let fs = Self {
            state: Mutex::new(State::default()),
            clock: AtomicI64::new(1),
            case_sensitive,
        };
        let root = fs.key(Path::new("/"));
        fs.lock().entries.insert(
            root,
            Entry {
                name: PathBuf::from("/"),
                node: Node::Dir,
                modified: 0,
            },
        );
        fs
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn key(&self, location: &Path) -> String {
        let mut key = String::from("/");
        let parts: Vec<String> = location
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => s.to_str().map(str::to_string),
                _ => None,
            })
            .collect();
        key.push_str(&parts.join("/"));
        if self.case_sensitive {
            key
        } else {
            key.to_lowercase()
        }
    }

    fn parent_key(&self, location: &Path) -> Option<String> {
        location.parent().map(|p| self.key(p))
    }

    fn check_fault(&self, state: &State, op: FsOp, location: &Path) -> Result<(), FsError> {
        if state.faults.contains(&(op, self.key(location))) {
            return Err(FsError::Io {
                op,
                path: location.to_path_buf(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    /// Make `op` fail at `location`.
    pub fn fail_on(&self, op: FsOp, location: impl AsRef<Path>) {
        let key = self.key(location.as_ref());
        self.lock().faults.insert((op, key));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Bump a file's modification time without changing its contents.
    pub fn touch_external(&self, location: &Path) -> Result<(), FsError> {
        let now = self.tick();
        let key = self.key(location);
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&key)
            .ok_or_else(|| FsError::NotFound(location.to_path_buf()))?;
        entry.modified = now;
        Ok(())
    }

    /// Number of entries, the root included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    fn children_keys(&self, state: &State, key: &str) -> Vec<String> {
        let prefix = if key == "/" {
            "/".to_string()
        } else {
            format!("{key}/")
        };
        state
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/') && k.len() > prefix.len())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn subtree_keys(&self, state: &State, key: &str) -> Vec<String> {
        let prefix = format!("{key}/");
        let mut keys = vec![key.to_string()];
        keys.extend(
            state
                .entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone()),
        );
        keys
    }
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFileSystem {
    fn stat(&self, location: &Path) -> Option<FileStat> {
        let state = self.lock();
        state.entries.get(&self.key(location)).map(|e| FileStat {
            is_directory: matches!(e.node, Node::Dir),
            modified: e.modified,
        })
    }

    fn read(&self, location: &Path) -> Result<Vec<u8>, FsError> {
        let state = self.lock();
        self.check_fault(&state, FsOp::Read, location)?;
        match state.entries.get(&self.key(location)) {
            Some(Entry {
                node: Node::File(bytes),
                ..
            }) => Ok(bytes.clone()),
            Some(_) => Err(FsError::Io {
                op: FsOp::Read,
                path: location.to_path_buf(),
                message: "is a directory".to_string(),
            }),
            None => Err(FsError::NotFound(location.to_path_buf())),
        }
    }

    fn write(&self, location: &Path, contents: &[u8]) -> Result<(), FsError> {
        let now = self.tick();
        let key = self.key(location);
        let mut state = self.lock();
        self.check_fault(&state, FsOp::Write, location)?;
        match self.parent_key(location).and_then(|p| state.entries.get(&p)) {
            Some(Entry { node: Node::Dir, .. }) => {}
            Some(_) => return Err(FsError::NotADirectory(location.to_path_buf())),
            None => return Err(FsError::NotFound(location.to_path_buf())),
        }
        if let Some(Entry { node: Node::Dir, .. }) = state.entries.get(&key) {
            return Err(FsError::AlreadyExists(location.to_path_buf()));
        }
        let name = state
            .entries
            .get(&key)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| location.to_path_buf());
        state.entries.insert(
            key,
            Entry {
                name,
                node: Node::File(contents.to_vec()),
                modified: now,
            },
        );
        Ok(())
    }

    fn mkdir(&self, location: &Path) -> Result<(), FsError> {
        let mut state = self.lock();
        self.check_fault(&state, FsOp::Mkdir, location)?;
        let mut current = PathBuf::from("/");
        for component in location.components() {
            if let std::path::Component::Normal(part) = component {
                current.push(part);
                let key = self.key(&current);
                match state.entries.get(&key) {
                    Some(Entry { node: Node::Dir, .. }) => {}
                    Some(_) => return Err(FsError::NotADirectory(current)),
                    None => {
                        let now = self.tick();
                        state.entries.insert(
                            key,
                            Entry {
                                name: current.clone(),
                                node: Node::Dir,
                                modified: now,
                            },
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn list(&self, location: &Path) -> Result<Vec<String>, FsError> {
        let state = self.lock();
        self.check_fault(&state, FsOp::List, location)?;
        let key = self.key(location);
        match state.entries.get(&key) {
            Some(Entry { node: Node::Dir, .. }) => {}
            Some(_) => return Err(FsError::NotADirectory(location.to_path_buf())),
            None => return Err(FsError::NotFound(location.to_path_buf())),
        }
        let mut names: Vec<String> = self
            .children_keys(&state, &key)
            .iter()
            .filter_map(|k| state.entries.get(k))
            .filter_map(|e| e.name.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn delete(&self, location: &Path) -> Result<(), FsError> {
        let mut state = self.lock();
        self.check_fault(&state, FsOp::Delete, location)?;
        let key = self.key(location);
        match state.entries.get(&key) {
            None => return Err(FsError::NotFound(location.to_path_buf())),
            Some(Entry { node: Node::Dir, .. }) => {
                if !self.children_keys(&state, &key).is_empty() {
                    return Err(FsError::DirectoryNotEmpty(location.to_path_buf()));
                }
            }
            Some(_) => {}
        }
        state.entries.remove(&key);
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let bytes = {
            let state = self.lock();
            self.check_fault(&state, FsOp::Copy, from)?;
            self.check_fault(&state, FsOp::Copy, to)?;
            match state.entries.get(&self.key(from)) {
                Some(Entry {
                    node: Node::File(bytes),
                    ..
                }) => bytes.clone(),
                Some(_) => return Err(FsError::NotADirectory(from.to_path_buf())),
                None => return Err(FsError::NotFound(from.to_path_buf())),
            }
        };
        self.write(to, &bytes)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), FsError> {
        let now = self.tick();
        let mut state = self.lock();
        self.check_fault(&state, FsOp::Rename, from)?;
        let from_key = self.key(from);
        let to_key = self.key(to);
        if !state.entries.contains_key(&from_key) {
            return Err(FsError::NotFound(from.to_path_buf()));
        }
        if from_key != to_key && state.entries.contains_key(&to_key) {
            return Err(FsError::AlreadyExists(to.to_path_buf()));
        }
        match self.parent_key(to).and_then(|p| state.entries.get(&p)) {
            Some(Entry { node: Node::Dir, .. }) => {}
            _ => return Err(FsError::NotFound(to.to_path_buf())),
        }
        let moved: Vec<(String, Entry)> = self
            .subtree_keys(&state, &from_key)
            .into_iter()
            .filter_map(|k| state.entries.remove(&k).map(|e| (k, e)))
            .collect();
        for (key, mut entry) in moved {
            let suffix = &key[from_key.len()..];
            let relative = entry
                .name
                .strip_prefix(from)
                .map(Path::to_path_buf)
                .unwrap_or_default();
            entry.name = if relative.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(relative)
            };
            if key == from_key {
                entry.modified = now;
            }
            state.entries.insert(format!("{to_key}{suffix}"), entry);
        }
        Ok(())
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }
}
