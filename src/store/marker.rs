//! store::marker
//!
//! Markers: problems, tasks and bookmarks attached to resources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::{PathTable, ResourceStore, StoreError, StoreKind};
use crate::core::flags::Depth;
use crate::core::info::MarkerId;
use crate::core::path::ResourcePath;

/// One marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub kind: String,
    pub message: String,
}

/// Marker storage.
pub trait MarkerStore: ResourceStore {
    fn create_marker(
        &self,
        path: &ResourcePath,
        kind: &str,
        message: &str,
    ) -> Result<MarkerId, StoreError>;

    fn markers(&self, path: &ResourcePath) -> Result<Vec<Marker>, StoreError>;
}

/// In-memory [`MarkerStore`].
#[derive(Debug)]
pub struct MemoryMarkerStore {
    table: Mutex<PathTable<Vec<Marker>>>,
    next_id: AtomicU64,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(PathTable::new(StoreKind::Marker)),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PathTable<Vec<Marker>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_at(&self, path: ResourcePath) {
        self.lock().fail_at(path);
    }
}

impl Default for MemoryMarkerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for MemoryMarkerStore {
    fn delete_all(&self, path: &ResourcePath, depth: Depth) -> Result<(), StoreError> {
        self.lock().delete_all(path, depth)
    }

    /// Copied markers get fresh ids.
    fn copy_all(
        &self,
        source: &ResourcePath,
        destination: &ResourcePath,
        depth: Depth,
    ) -> Result<(), StoreError> {
        let mut table = self.lock();
        table.copy_all(source, destination, depth)?;
        for (path, markers) in table.entries.iter_mut() {
            if destination.is_prefix_of(path) {
                for marker in markers.iter_mut() {
                    marker.id = self.next_id.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    fn move_all(&self, source: &ResourcePath, destination: &ResourcePath) -> Result<(), StoreError> {
        let mut table = self.lock();
        table.copy_all(source, destination, Depth::Infinite)?;
        table.delete_all(source, Depth::Infinite)
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn create_marker(
        &self,
        path: &ResourcePath,
        kind: &str,
        message: &str,
    ) -> Result<MarkerId, StoreError> {
        let mut table = self.lock();
        table.check(path)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        table.entries.entry(path.clone()).or_default().push(Marker {
            id,
            kind: kind.to_string(),
            message: message.to_string(),
        });
        Ok(id)
    }

    fn markers(&self, path: &ResourcePath) -> Result<Vec<Marker>, StoreError> {
        let table = self.lock();
        table.check(path)?;
        Ok(table.entries.get(path).cloned().unwrap_or_default())
    }
}
