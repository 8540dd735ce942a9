//! Configuration management for the signer.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default upper bound on pooled key configuration connections.
pub const DEFAULT_POOL_MAX_SIZE: u32 = 8;

/// Default period between background reconciliations with the store.
pub const DEFAULT_MERGE_INTERVAL_SECS: u64 = 60;

/// Main signer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Key configuration database. Resolved against [`Paths`] when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Maximum pooled connections to the key configuration database.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    /// Seconds between background merges of externally changed key config.
    #[serde(default = "default_merge_interval_secs")]
    pub merge_interval_secs: u64,
    /// Enforce the software token PIN policy on initialization.
    #[serde(default)]
    pub enforce_token_pin_policy: bool,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_pool_max_size() -> u32 {
    DEFAULT_POOL_MAX_SIZE
}

fn default_merge_interval_secs() -> u64 {
    DEFAULT_MERGE_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database_path: None,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            merge_interval_secs: DEFAULT_MERGE_INTERVAL_SECS,
            enforce_token_pin_policy: false,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Resolve the database location, defaulting to the one under `paths`.
    pub fn database_file(&self, paths: &Paths) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    fn load_from_env(&mut self) -> CoreResult<()> {
        if let Ok(log_level) = std::env::var("SIGNER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(path) = std::env::var("SIGNER_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Ok(raw) = std::env::var("SIGNER_MERGE_INTERVAL_SECS") {
            self.merge_interval_secs = raw.trim().parse().map_err(|_| {
                CoreError::Config(format!("SIGNER_MERGE_INTERVAL_SECS is not a number: {}", raw))
            })?;
        }
        Ok(())
    }
}
