//! File system paths for the signer.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the signer.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for signer files (~/.xroad-signer)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.xroad-signer`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".xroad-signer"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.xroad-signer).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.xroad-signer/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the key configuration database path (~/.xroad-signer/keyconf.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("keyconf.sqlite")
    }

    /// Get the logs directory (~/.xroad-signer/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the central log file (~/.xroad-signer/logs/signer.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("signer.jsonl")
    }

    /// Ensure the base and logs directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
