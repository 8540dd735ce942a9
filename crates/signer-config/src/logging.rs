//! Logging initialization for the signer.
//!
//! All signer components share the observability crate's JSONL sink at
//! `~/.xroad-signer/logs/signer.jsonl`.

use crate::Paths;

/// Initialize the logging system for the signer.
///
/// Log level comes from `RUST_LOG` when set, otherwise from `level`.
///
/// ```ignore
/// init_logging(&paths, "info");
/// tracing::info!("signer started");
/// ```
pub fn init_logging(paths: &Paths, level: &str) {
    observability::init_with_config(observability::LogConfig {
        service_name: "signer".into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: std::env::var("SIGNER_LOG_STDERR").is_ok(),
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
