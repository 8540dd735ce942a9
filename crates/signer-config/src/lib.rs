//! Configuration, paths and logging bootstrap for the signer.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_LOG_LEVEL, DEFAULT_MERGE_INTERVAL_SECS, DEFAULT_POOL_MAX_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
