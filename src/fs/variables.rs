//! fs::variables
//!
//! Path variables for linked resources (`${NAME}/rest`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use crate::core::info::LinkLocation;

/// Resolves a path variable name to a concrete location.
pub trait PathVariableResolver: Send + Sync {
    fn resolve_variable(&self, name: &str) -> Option<PathBuf>;

    /// Resolve a link location.
    ///
    /// `Ok(None)` for virtual locations. `Err(name)` when a variable is
    /// undefined.
    fn resolve(&self, location: &LinkLocation) -> Result<Option<PathBuf>, String> {
        match location {
            LinkLocation::Path { path } => Ok(Some(path.clone())),
            LinkLocation::Variable { name, rest } => self
                .resolve_variable(name)
                .map(|base| Some(if rest.as_os_str().is_empty() { base } else { base.join(rest) }))
                .ok_or_else(|| name.clone()),
            LinkLocation::Virtual => Ok(None),
        }
    }
}

/// A mutable table of path variables.
#[derive(Debug, Default)]
pub struct PathVariables {
    values: RwLock<BTreeMap<String, PathBuf>>,
}

impl PathVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or, with `None`, remove a variable.
    pub fn set(&self, name: impl Into<String>, value: Option<PathBuf>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => {
                values.insert(name.into(), v);
            }
            None => {
                values.remove(&name.into());
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl PathVariableResolver for PathVariables {
    fn resolve_variable(&self, name: &str) -> Option<PathBuf> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
