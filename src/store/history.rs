//! store::history
//!
//! Local history: earlier contents of files, newest last.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{PathTable, ResourceStore, StoreError, StoreKind};
use crate::core::flags::Depth;
use crate::core::path::ResourcePath;

/// One recorded state of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryState {
    pub recorded_at: DateTime<Utc>,
    pub contents: Vec<u8>,
}

/// History storage.
pub trait HistoryStore: ResourceStore {
    fn add_state(&self, path: &ResourcePath, contents: Vec<u8>) -> Result<(), StoreError>;

    /// States for `path`, oldest first.
    fn states(&self, path: &ResourcePath) -> Result<Vec<HistoryState>, StoreError>;
}

/// In-memory [`HistoryStore`] bounded per file.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    table: Mutex<PathTable<Vec<HistoryState>>>,
    max_states: usize,
}

impl MemoryHistoryStore {
    pub fn new(max_states: usize) -> Self {
        Self {
            table: Mutex::new(PathTable::new(StoreKind::History)),
            max_states: max_states.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PathTable<Vec<HistoryState>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_at(&self, path: ResourcePath) {
        self.lock().fail_at(path);
    }
}

impl ResourceStore for MemoryHistoryStore {
    fn delete_all(&self, path: &ResourcePath, depth: Depth) -> Result<(), StoreError> {
        self.lock().delete_all(path, depth)
    }

    fn copy_all(
        &self,
        source: &ResourcePath,
        destination: &ResourcePath,
        depth: Depth,
    ) -> Result<(), StoreError> {
        self.lock().copy_all(source, destination, depth)
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn add_state(&self, path: &ResourcePath, contents: Vec<u8>) -> Result<(), StoreError> {
        let mut table = self.lock();
        table.check(path)?;
        let states = table.entries.entry(path.clone()).or_default();
        states.push(HistoryState {
            recorded_at: Utc::now(),
            contents,
        });
        if states.len() > self.max_states {
            let excess = states.len() - self.max_states;
            states.drain(..excess);
        }
        Ok(())
    }

    fn states(&self, path: &ResourcePath) -> Result<Vec<HistoryState>, StoreError> {
        let table = self.lock();
        table.check(path)?;
        Ok(table.entries.get(path).cloned().unwrap_or_default())
    }
}
