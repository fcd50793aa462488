//! Configuration loading and management
//!
//! Handles parsing of `.tasklink.toml` configuration files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::migrate::MigrationOptions;
use crate::validate::CompletionPolicy;

/// Name of the configuration file at the project root
pub const CONFIG_FILE: &str = ".tasklink.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task store location and locking
    #[serde(default)]
    pub store: StoreConfig,

    /// Task id generation
    #[serde(default)]
    pub tasks: TasksConfig,

    /// Guard and retry policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Legacy migration behaviour
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory, relative to the project root
    #[serde(default = "default_store_dir")]
    pub dir: String,

    /// How long to wait for a task lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_store_dir() -> String {
    ".tasklink".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Tasks configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Project-wide task ID prefix
    #[serde(default = "default_task_id_prefix")]
    pub id_prefix: String,

    /// Minimum generated task ID suffix length
    #[serde(default = "default_task_id_min_len")]
    pub id_min_len: usize,
}

fn default_task_id_prefix() -> String {
    "tl".to_string()
}

fn default_task_id_min_len() -> usize {
    4
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            id_prefix: default_task_id_prefix(),
            id_min_len: default_task_id_min_len(),
        }
    }
}

/// Policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Completing a parent requires every child to be complete
    #[serde(default = "default_true")]
    pub require_children_complete: bool,

    /// Re-read/re-validate attempts after a stale write
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_conflict_retries() -> u32 {
    1
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_children_complete: true,
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

impl PolicyConfig {
    pub fn completion_policy(&self) -> CompletionPolicy {
        if self.require_children_complete {
            CompletionPolicy::RequireChildren
        } else {
            CompletionPolicy::AllowPartial
        }
    }
}

/// Migration configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Accept one-sided legacy links when the other side is silent
    #[serde(default)]
    pub infer_missing_inverse: bool,
}

impl MigrationConfig {
    pub fn options(&self) -> MigrationOptions {
        MigrationOptions {
            infer_missing_inverse: self.infer_missing_inverse,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a `.tasklink.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the project root, or return defaults when missing
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Absolute store directory for a project root
    pub fn store_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.store.dir)
    }

    fn validate(&self) -> Result<()> {
        if self.store.dir.trim().is_empty() {
            return Err(Error::InvalidConfig("store.dir cannot be empty".to_string()));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        self.tasks.validate()?;
        if self.policy.max_conflict_retries > 10 {
            return Err(Error::InvalidConfig(
                "policy.max_conflict_retries must be <= 10".to_string(),
            ));
        }
        Ok(())
    }
}

impl TasksConfig {
    fn validate(&self) -> Result<()> {
        let prefix = self.id_prefix.trim();
        if prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "tasks.id_prefix cannot be empty".to_string(),
            ));
        }
        if !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(
                "tasks.id_prefix must be alphanumeric".to_string(),
            ));
        }
        if self.id_min_len < 3 {
            return Err(Error::InvalidConfig(
                "tasks.id_min_len must be >= 3".to_string(),
            ));
        }
        if self.id_min_len > 16 {
            return Err(Error::InvalidConfig(
                "tasks.id_min_len must be <= 16".to_string(),
            ));
        }
        Ok(())
    }
}
