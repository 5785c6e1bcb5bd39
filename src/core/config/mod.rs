//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Two configuration scopes:
//! - **Global**: User-level settings
//! - **Workspace**: Per-workspace overrides
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Workspace config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$CANOPY_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/canopy/config.toml`
//! 3. `~/.canopy/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use canopy::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/path/to/workspace"))).unwrap();
//! let config = result.config;
//! println!("poll every {:?}", config.lock_poll_interval());
//! println!("notify: {}", config.notification_enabled());
//! ```

pub mod schema;

pub use schema::{GlobalConfig, WorkspaceConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::paths::WorkspacePaths;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
}

/// When link creation refreshes the new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Foreground,
    Background,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence: workspace over global over defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub workspace: Option<WorkspaceConfig>,
    global_path: Option<PathBuf>,
    workspace_path: Option<PathBuf>,
}

impl Config {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
    pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;
    pub const DEFAULT_HISTORY_STATES: usize = 50;

    /// Load configuration from default locations.
    ///
    /// If `root` is provided, also loads that workspace's config.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or fail
    /// validation. Missing files are not an error.
    pub fn load(root: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let (global, global_path) = Self::load_global()?;
        Self::assemble(global, global_path, root)
    }

    /// Load with an explicit global config file instead of the search path.
    pub fn load_with_global(
        global_file: Option<&Path>,
        root: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let (global, global_path) = match global_file {
            Some(path) if path.exists() => (Self::read_toml(path)?, Some(path.to_path_buf())),
            _ => (GlobalConfig::default(), None),
        };
        Self::assemble(global, global_path, root)
    }

    fn assemble(
        global: GlobalConfig,
        global_path: Option<PathBuf>,
        root: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let (workspace, workspace_path) = match root {
            Some(root) => Self::load_workspace(root)?,
            None => (None, None),
        };

        global.validate()?;
        if let Some(ref w) = workspace {
            w.validate()?;
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                workspace,
                global_path,
                workspace_path,
            },
        })
    }

    fn load_global() -> Result<(GlobalConfig, Option<PathBuf>), ConfigError> {
        if let Ok(path) = std::env::var("CANOPY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                let config = Self::read_toml(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("canopy/config.toml");
            if path.exists() {
                let config = Self::read_toml(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".canopy/config.toml");
            if path.exists() {
                let config = Self::read_toml(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((GlobalConfig::default(), None))
    }

    fn load_workspace(
        root: &Path,
    ) -> Result<(Option<WorkspaceConfig>, Option<PathBuf>), ConfigError> {
        let path = Self::workspace_config_path(root);
        if !path.exists() {
            return Ok((None, None));
        }
        let config = Self::read_toml(&path)?;
        Ok((Some(config), Some(path)))
    }

    fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Returns `<root>/.canopy/config.toml`.
    pub fn workspace_config_path(root: &Path) -> PathBuf {
        WorkspacePaths::new(root.to_path_buf()).config_path()
    }

    /// Write workspace config atomically.
    pub fn write_workspace(root: &Path, config: &WorkspaceConfig) -> Result<PathBuf, ConfigError> {
        let path = Self::workspace_config_path(root);
        Self::write_config_atomic(&path, config)?;
        Ok(path)
    }

    /// Write to a temp file in the same directory, then rename.
    fn write_config_atomic<T: serde::Serialize>(
        path: &Path,
        config: &T,
    ) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Case-sensitivity override; `None` means ask the filesystem adapter.
    pub fn case_sensitive(&self) -> Option<bool> {
        self.workspace.as_ref().and_then(|w| w.case_sensitive)
    }

    /// Defaults to 50ms.
    pub fn lock_poll_interval(&self) -> Duration {
        let ms = self
            .workspace
            .as_ref()
            .and_then(|w| w.lock_poll_interval_ms)
            .or(self.global.lock_poll_interval_ms)
            .unwrap_or(Self::DEFAULT_POLL_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    /// Defaults to `true`.
    pub fn notification_enabled(&self) -> bool {
        self.workspace
            .as_ref()
            .and_then(|w| w.notification.as_ref())
            .and_then(|n| n.enabled)
            .or_else(|| self.global.notification.as_ref().and_then(|n| n.enabled))
            .unwrap_or(true)
    }

    pub fn notification_capacity(&self) -> usize {
        self.workspace
            .as_ref()
            .and_then(|w| w.notification.as_ref())
            .and_then(|n| n.capacity)
            .or_else(|| self.global.notification.as_ref().and_then(|n| n.capacity))
            .unwrap_or(Self::DEFAULT_NOTIFICATION_CAPACITY)
    }

    pub fn history_max_states(&self) -> usize {
        self.workspace
            .as_ref()
            .and_then(|w| w.history.as_ref())
            .and_then(|h| h.max_states)
            .or_else(|| self.global.history.as_ref().and_then(|h| h.max_states))
            .unwrap_or(Self::DEFAULT_HISTORY_STATES)
    }

    /// Defaults to foreground.
    pub fn link_refresh_mode(&self) -> RefreshMode {
        let mode = self
            .workspace
            .as_ref()
            .and_then(|w| w.refresh.as_ref())
            .and_then(|r| r.on_create_link.as_deref())
            .or_else(|| {
                self.global
                    .refresh
                    .as_ref()
                    .and_then(|r| r.on_create_link.as_deref())
            });
        match mode {
            Some("background") => RefreshMode::Background,
            _ => RefreshMode::Foreground,
        }
    }

    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    pub fn workspace_config_loaded_from(&self) -> Option<&Path> {
        self.workspace_path.as_deref()
    }
}
