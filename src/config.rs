//! Configuration loading and management
//!
//! Handles parsing of `.tw.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::task::Priority;

/// Name of the configuration file at the workspace root
pub const CONFIG_FILE: &str = ".tw.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Task defaults
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Recurrence behaviour
    #[serde(default)]
    pub recurrence: RecurrenceSettings,

    /// Storage tuning
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tasks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Task ID prefix
    #[serde(default = "default_task_id_prefix")]
    pub id_prefix: String,

    /// Priority for tasks created without one
    #[serde(default)]
    pub default_priority: Priority,
}

fn default_task_id_prefix() -> String {
    "tw".to_string()
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_task_id_prefix(),
            default_priority: Priority::default(),
        }
    }
}

/// Recurrence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceSettings {
    /// Completing a generated instance schedules the next one right away
    #[serde(default = "default_true")]
    pub advance_on_complete: bool,

    /// Reject rules that set neither an end date nor a count
    #[serde(default)]
    pub require_end_condition: bool,

    /// Default for `tw recur clear`: also delete undone instances
    #[serde(default)]
    pub cascade_on_clear: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RecurrenceSettings {
    fn default() -> Self {
        Self {
            advance_on_complete: true,
            require_end_condition: false,
            cascade_on_clear: false,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// How long to wait for the store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a `.tw.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a workspace root, or return defaults
    pub fn load_from_dir(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), %err, "ignoring invalid config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> crate::error::Result<()> {
        self.tasks.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

impl TasksConfig {
    fn validate(&self) -> crate::error::Result<()> {
        let prefix = self.id_prefix.trim();
        if prefix.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "tasks.id_prefix cannot be empty".to_string(),
            ));
        }
        if !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(crate::error::Error::InvalidConfig(
                "tasks.id_prefix must be alphanumeric".to_string(),
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "storage.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
