//! store
//!
//! Per-resource stores kept beside the tree: persistent properties, markers
//! and local history.
//!
//! # Architecture
//!
//! The stores are keyed by resource path and know nothing about the tree.
//! The mutation protocol calls [`ResourceStore::delete_all`] when resources
//! are deleted and [`ResourceStore::copy_all`] when they are copied (a move
//! is a copy followed by a delete). A store failure never aborts the
//! structural edit; it is folded into the operation's multi-status.
//!
//! In-memory implementations ship with the crate and support failure
//! injection for tests.

pub mod history;
pub mod marker;
pub mod property;

pub use history::{HistoryState, HistoryStore, MemoryHistoryStore};
pub use marker::{Marker, MarkerStore, MemoryMarkerStore};
pub use property::{MemoryPropertyStore, PropertyStore};

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::flags::Depth;
use crate::core::path::ResourcePath;

/// Errors from a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{store} store failed at {path}: {message}")]
    Failed {
        store: StoreKind,
        path: ResourcePath,
        message: String,
    },
}

/// Which store reported a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Property,
    Marker,
    History,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreKind::Property => "property",
            StoreKind::Marker => "marker",
            StoreKind::History => "history",
        })
    }
}

/// The calls the mutation protocol issues to every store.
pub trait ResourceStore: Send + Sync {
    /// Drop everything recorded for `path` down to `depth`.
    fn delete_all(&self, path: &ResourcePath, depth: Depth) -> Result<(), StoreError>;

    /// Duplicate everything recorded under `source` onto `destination`.
    fn copy_all(
        &self,
        source: &ResourcePath,
        destination: &ResourcePath,
        depth: Depth,
    ) -> Result<(), StoreError>;

    /// Carry data to a new path. Defaults to copy then delete.
    fn move_all(
        &self,
        source: &ResourcePath,
        destination: &ResourcePath,
    ) -> Result<(), StoreError> {
        self.copy_all(source, destination, Depth::Infinite)?;
        self.delete_all(source, Depth::Infinite)
    }
}

/// The three stores a workspace talks to.
#[derive(Clone)]
pub struct Stores {
    pub properties: Arc<dyn PropertyStore>,
    pub markers: Arc<dyn MarkerStore>,
    pub history: Arc<dyn HistoryStore>,
}

impl Stores {
    /// In-memory stores keeping at most `max_states` history states per file.
    pub fn in_memory(max_states: usize) -> Self {
        Self {
            properties: Arc::new(MemoryPropertyStore::new()),
            markers: Arc::new(MemoryMarkerStore::new()),
            history: Arc::new(MemoryHistoryStore::new(max_states)),
        }
    }

    /// Delete from every store, collecting failures instead of stopping.
    ///
    /// History is skipped when `keep_history` is set.
    pub fn delete_all(&self, path: &ResourcePath, depth: Depth, keep_history: bool) -> Vec<StoreError> {
        let mut failures = Vec::new();
        if let Err(e) = self.properties.delete_all(path, depth) {
            failures.push(e);
        }
        if let Err(e) = self.markers.delete_all(path, depth) {
            failures.push(e);
        }
        if !keep_history {
            if let Err(e) = self.history.delete_all(path, depth) {
                failures.push(e);
            }
        }
        failures
    }

    /// Copy properties and markers. History stays with the source.
    pub fn copy_all(&self, source: &ResourcePath, destination: &ResourcePath) -> Vec<StoreError> {
        let mut failures = Vec::new();
        if let Err(e) = self.properties.copy_all(source, destination, Depth::Infinite) {
            failures.push(e);
        }
        if let Err(e) = self.markers.copy_all(source, destination, Depth::Infinite) {
            failures.push(e);
        }
        failures
    }

    /// Move data in every store.
    pub fn move_all(&self, source: &ResourcePath, destination: &ResourcePath) -> Vec<StoreError> {
        [
            self.properties.move_all(source, destination),
            self.markers.move_all(source, destination),
            self.history.move_all(source, destination),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect()
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Path-keyed storage shared by the in-memory stores.
#[derive(Debug)]
pub(crate) struct PathTable<V> {
    pub(crate) entries: BTreeMap<ResourcePath, V>,
    failing: HashSet<ResourcePath>,
    kind: StoreKind,
}

impl<V: Clone> PathTable<V> {
    pub(crate) fn new(kind: StoreKind) -> Self {
        Self {
            entries: BTreeMap::new(),
            failing: HashSet::new(),
            kind,
        }
    }

    pub(crate) fn fail_at(&mut self, path: ResourcePath) {
        self.failing.insert(path);
    }

    pub(crate) fn check(&self, path: &ResourcePath) -> Result<(), StoreError> {
        if self.failing.iter().any(|f| f.is_prefix_of(path)) {
            return Err(StoreError::Failed {
                store: self.kind,
                path: path.clone(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn within(base: &ResourcePath, key: &ResourcePath, depth: Depth) -> bool {
        base.is_prefix_of(key) && depth.reaches(key.segment_count() - base.segment_count())
    }

    pub(crate) fn delete_all(&mut self, path: &ResourcePath, depth: Depth) -> Result<(), StoreError> {
        self.check(path)?;
        self.entries.retain(|k, _| !Self::within(path, k, depth));
        Ok(())
    }

    pub(crate) fn copy_all(
        &mut self,
        source: &ResourcePath,
        destination: &ResourcePath,
        depth: Depth,
    ) -> Result<(), StoreError> {
        self.check(source)?;
        self.check(destination)?;
        let copied: Vec<(ResourcePath, V)> = self
            .entries
            .iter()
            .filter(|(k, _)| Self::within(source, k, depth))
            .filter_map(|(k, v)| k.rebase(source, destination).map(|t| (t, v.clone())))
            .collect();
        self.entries.extend(copied);
        Ok(())
    }
}
