//! Provider configuration settings
//!
//! Layered configuration: defaults → config file → environment variables (`GITSC_*`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Default per-operation subprocess timeout
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;

/// Default cap on captured standard output (64 MiB)
pub const DEFAULT_OUTPUT_CAP_BYTES: usize = 64 * 1024 * 1024;

/// Default maximum number of pending operations
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Maximum number of files submitted in a single git command
pub const DEFAULT_MAX_FILES_PER_BATCH: usize = 50;

/// Provider configuration
///
/// Consumed, not owned, by the core: the host supplies it at activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the git executable (auto-detected when unset)
    pub binary_path: Option<PathBuf>,

    /// Root of the working copy (discovered from the current directory when unset)
    pub repository_root: Option<PathBuf>,

    /// Timeout for a single git invocation, in milliseconds
    pub operation_timeout_ms: u64,

    /// Maximum bytes of standard output accepted from one invocation
    pub output_cap_bytes: usize,

    /// Maximum number of queued operations
    pub queue_capacity: usize,

    /// Maximum number of paths passed to one git invocation
    pub max_files_per_batch: usize,

    /// Classify changed files as binary or text via `git check-attr`
    pub classify_files: bool,

    /// Use the Git LFS file locking workflow
    pub lfs_locking: bool,

    /// User name on the Git LFS lock server (defaults to git `user.name`)
    pub lfs_user_name: Option<String>,

    /// Push to the remote after every successful commit
    pub push_after_commit: bool,

    /// Remote used by sync and push
    pub remote: String,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary_path: None,
            repository_root: None,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_files_per_batch: DEFAULT_MAX_FILES_PER_BATCH,
            classify_files: true,
            lfs_locking: false,
            lfs_user_name: None,
            push_after_commit: false,
            remote: "origin".to_string(),
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration layering a specific file over the defaults
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(config_path))
            // Layer environment variables (GITSC_REPOSITORY_ROOT, etc.)
            .merge(Env::prefixed("GITSC_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the provider cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(invalid("operation_timeout_ms", "timeout must be finite and non-zero"));
        }
        if self.output_cap_bytes == 0 {
            return Err(invalid("output_cap_bytes", "output cap must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "queue must hold at least one operation"));
        }
        if self.max_files_per_batch == 0 {
            return Err(invalid("max_files_per_batch", "batches must hold at least one file"));
        }
        if self.remote.trim().is_empty() {
            return Err(invalid("remote", "remote name must not be empty"));
        }
        Ok(())
    }

    /// Per-invocation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Save current configuration to the default file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save current configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "gitsc", "gitsc").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}
