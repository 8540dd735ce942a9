//! SQLite key configuration store for the signer.
//!
//! This crate provides:
//! - A connection pool with WAL mode and transactional helpers
//! - Versioned schema migrations
//! - Entity records for devices (tokens), keys, certificates and
//!   certificate requests
//! - Bulk graph queries used to load and replace the whole key configuration
//! - Single-row write queries keyed by internal numeric id
//!
//! # Transactions
//!
//! Everything that changes more than one row goes through
//! [`DatabasePool::in_transaction`], which commits when the closure returns
//! `Ok` and rolls back otherwise. A partially replaced device graph is never
//! visible to other connections.
//!
//! ```ignore
//! let pool = DatabasePool::open(path, PoolConfig::default())?;
//! let devices = pool.in_transaction(|tx| device_dao::find_all(tx))?;
//! ```

pub mod device_dao;
mod error;
mod migrations;
mod models;
mod pool;
pub mod writes;

pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::*;
pub use pool::{DatabasePool, PoolConfig, PoolState};
