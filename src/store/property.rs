//! store::property
//!
//! Persistent properties: qualified name to string, per resource.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{PathTable, ResourceStore, StoreError, StoreKind};
use crate::core::flags::Depth;
use crate::core::info::QualifiedName;
use crate::core::path::ResourcePath;

/// Persistent property storage.
pub trait PropertyStore: ResourceStore {
    fn set_property(
        &self,
        path: &ResourcePath,
        key: QualifiedName,
        value: Option<String>,
    ) -> Result<(), StoreError>;

    fn property(&self, path: &ResourcePath, key: &QualifiedName) -> Result<Option<String>, StoreError>;
}

type Properties = BTreeMap<QualifiedName, String>;

/// In-memory [`PropertyStore`].
#[derive(Debug)]
pub struct MemoryPropertyStore {
    table: Mutex<PathTable<Properties>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(PathTable::new(StoreKind::Property)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PathTable<Properties>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every call touching `path` or below.
    pub fn fail_at(&self, path: ResourcePath) {
        self.lock().fail_at(path);
    }
}

impl Default for MemoryPropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for MemoryPropertyStore {
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

impl PropertyStore for MemoryPropertyStore {
    fn set_property(
        &self,
        path: &ResourcePath,
        key: QualifiedName,
        value: Option<String>,
    ) -> Result<(), StoreError> {
        let mut table = self.lock();
        table.check(path)?;
        match value {
            Some(value) => {
                table.entries.entry(path.clone()).or_default().insert(key, value);
            }
            None => {
                if let Some(props) = table.entries.get_mut(path) {
                    props.remove(&key);
                    if props.is_empty() {
                        table.entries.remove(path);
                    }
                }
            }
        }
        Ok(())
    }

    fn property(&self, path: &ResourcePath, key: &QualifiedName) -> Result<Option<String>, StoreError> {
        let table = self.lock();
        table.check(path)?;
        Ok(table.entries.get(path).and_then(|p| p.get(key)).cloned())
    }
}
