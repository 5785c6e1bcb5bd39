//! core::paths
//!
//! Centralized path routing for workspace storage locations.
//!
//! # Storage Layout
//!
//! A workspace lives in a root directory. Projects default to
//! `<root>/<project-name>/`. Workspace metadata is kept under
//! `<root>/.canopy/`:
//! - `config.toml` - Workspace configuration
//! - `lock` - Cross-process exclusive lock file
//!
//! **Hard rule:** no code outside this module computes `.canopy` paths.
//!
//! # Example
//!
//! ```
//! use canopy::core::paths::WorkspacePaths;
//! use std::path::PathBuf;
//!
//! let paths = WorkspacePaths::new(PathBuf::from("/ws"));
//! assert_eq!(paths.config_path(), PathBuf::from("/ws/.canopy/config.toml"));
//! assert_eq!(paths.default_project_location("p"), PathBuf::from("/ws/p"));
//! ```

use std::path::{Path, PathBuf};

/// Name of the metadata directory under the workspace root.
pub const METADATA_DIR: &str = ".canopy";

/// Centralized path routing for workspace storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The workspace root directory on the local filesystem.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.canopy`
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// `<root>/.canopy/config.toml`
    pub fn config_path(&self) -> PathBuf {
        self.metadata_dir().join("config.toml")
    }

    /// `<root>/.canopy/lock`
    pub fn lock_path(&self) -> PathBuf {
        self.metadata_dir().join("lock")
    }

    /// Where a project without an explicit location lives.
    pub fn default_project_location(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    /// Whether a project name would collide with workspace metadata.
    pub fn is_reserved_name(name: &str) -> bool {
        name.eq_ignore_ascii_case(METADATA_DIR)
    }

    /// Create `<root>/.canopy/` if needed.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.metadata_dir())
    }
}
