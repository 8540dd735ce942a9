//! # Observability
//!
//! Centralized structured logging for the signer workspace.
//!
//! ## Design Philosophy
//!
//! Components are **log producers**. They call `observability::init()` once
//! at process start and use standard `tracing` macros everywhere else. They
//! never decide where log lines go or who reads them.
//!
//! ## Output
//!
//! Every event is written as one JSON object per line to a central file,
//! `~/.xroad-signer/logs/signer.jsonl` unless overridden. Fields whose name
//! marks them as secret material (PINs, keystores, passwords) are replaced
//! with a redaction marker before serialization, so token PINs and sealed
//! key material can never reach the log file even if a caller records them
//! by mistake.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "signer".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!(token_id = "0", "token activated");
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{CentralLogWriter, WriterFactory};
pub use json_layer::{is_sensitive_field, JsonLayer, LogEntry, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the component (e.g., "signer", "signer-merge").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.xroad-signer/logs/signer.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Central log file location when no explicit path is configured.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".xroad-signer").join("logs").join("signer.jsonl"))
}

/// Initialize the logging layer with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the logging layer with custom configuration.
///
/// If the central log file cannot be opened, logging degrades to stderr
/// instead of aborting the process. Calling this more than once is a no-op
/// for every call after the first.
pub fn init_with_config(config: LogConfig) {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let writer = config
        .log_path
        .clone()
        .or_else(default_log_path)
        .map(|path| (CentralLogWriter::new(&path), path));

    let (json_layer, log_path) = match writer {
        Some((Ok(writer), path)) => (
            Some(JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))),
            Some(path),
        ),
        Some((Err(e), path)) => {
            eprintln!("failed to open log file {}: {}", path.display(), e);
            (None, None)
        }
        None => (None, None),
    };

    let also_stderr = config.also_stderr || json_layer.is_none();
    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|layer| layer.with_filter(env_filter())))
        .with(stderr_layer)
        .try_init();

    if installed.is_ok() {
        tracing::info!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        );
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_default_log_path_is_under_signer_dir() {
        if let Some(path) = default_log_path() {
            assert!(path.ends_with(".xroad-signer/logs/signer.jsonl"));
        }
    }
}
