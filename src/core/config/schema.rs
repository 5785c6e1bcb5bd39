//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$CANOPY_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/canopy/config.toml`
//! 3. `~/.canopy/config.toml`
//!
//! # Workspace Config
//!
//! Located at `<root>/.canopy/config.toml`.
//!
//! # Validation
//!
//! Values are validated after parsing: intervals and capacities must be
//! positive, and the refresh mode must be a known name.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// lock_poll_interval_ms = 50
///
/// [notification]
/// enabled = true
/// capacity = 256
///
/// [history]
/// max_states = 50
///
/// [refresh]
/// on_create_link = "foreground"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// How often a blocked rule acquisition re-checks cancellation.
    pub lock_poll_interval_ms: Option<u64>,

    pub notification: Option<NotificationConfig>,

    pub history: Option<HistoryConfig>,

    pub refresh: Option<RefreshConfig>,
}

impl GlobalConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.lock_poll_interval_ms)?;
        if let Some(n) = &self.notification {
            n.validate()?;
        }
        if let Some(h) = &self.history {
            h.validate()?;
        }
        if let Some(r) = &self.refresh {
            r.validate()?;
        }
        Ok(())
    }
}

/// Workspace configuration, overriding the global scope.
///
/// # Example
///
/// ```toml
/// case_sensitive = false
///
/// [refresh]
/// on_create_link = "background"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Override the filesystem adapter's case-sensitivity detection.
    pub case_sensitive: Option<bool>,

    pub lock_poll_interval_ms: Option<u64>,

    pub notification: Option<NotificationConfig>,

    pub history: Option<HistoryConfig>,

    pub refresh: Option<RefreshConfig>,
}

impl WorkspaceConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.lock_poll_interval_ms)?;
        if let Some(n) = &self.notification {
            n.validate()?;
        }
        if let Some(h) = &self.history {
            h.validate()?;
        }
        if let Some(r) = &self.refresh {
            r.validate()?;
        }
        Ok(())
    }
}

fn validate_interval(interval: Option<u64>) -> Result<(), ConfigError> {
    match interval {
        Some(0) => Err(ConfigError::InvalidValue(
            "lock_poll_interval_ms must be greater than zero".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Change notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Deliver deltas to listeners at all.
    pub enabled: Option<bool>,

    /// Pending deltas kept before the oldest are coalesced.
    pub capacity: Option<usize>,
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == Some(0) {
            return Err(ConfigError::InvalidValue(
                "notification.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Local history settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    /// States kept per file; older states are dropped.
    pub max_states: Option<usize>,
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_states == Some(0) {
            return Err(ConfigError::InvalidValue(
                "history.max_states must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Refresh settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// How link creation refreshes when the caller does not say
    /// ("foreground" or "background").
    pub on_create_link: Option<String>,
}

impl RefreshConfig {
    pub const VALID_MODES: &'static [&'static str] = &["foreground", "background"];

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mode) = &self.on_create_link {
            if !Self::VALID_MODES.contains(&mode.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid refresh mode '{}', must be one of: {}",
                    mode,
                    Self::VALID_MODES.join(", ")
                )));
            }
        }
        Ok(())
    }
}
