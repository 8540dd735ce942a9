//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_key_config(conn)?;
    }
    if current_version < 2 {
        migrate_v2_lookup_indexes(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: devices, keys, certificates and certificate requests.
fn migrate_v1_key_config(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE keyconf_device (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL UNIQUE,
            device_type TEXT NOT NULL,
            friendly_name TEXT,
            token_id TEXT,
            slot_id TEXT,
            pin_index INTEGER NOT NULL DEFAULT 0,
            sign_mechanism TEXT,
            pin_hash BLOB,
            read_only INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE keyconf_key (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL REFERENCES keyconf_device(id) ON DELETE CASCADE,
            key_id TEXT NOT NULL UNIQUE,
            friendly_name TEXT,
            label TEXT,
            public_key BLOB,
            usage TEXT,
            sign_mechanism TEXT,
            keystore BLOB
        );

        CREATE TABLE keyconf_certificate (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_id INTEGER NOT NULL REFERENCES keyconf_key(id) ON DELETE CASCADE,
            cert_id TEXT NOT NULL UNIQUE,
            member_id TEXT,
            active INTEGER NOT NULL DEFAULT 0,
            status TEXT,
            contents BLOB NOT NULL,
            renewed_cert_hash TEXT,
            renewal_error TEXT,
            next_renewal_time TEXT,
            ocsp_verify_error TEXT
        );

        CREATE TABLE keyconf_cert_request (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_id INTEGER NOT NULL REFERENCES keyconf_key(id) ON DELETE CASCADE,
            cert_request_id TEXT NOT NULL UNIQUE,
            member_id TEXT,
            subject_name TEXT NOT NULL,
            subject_alt_name TEXT,
            certificate_profile TEXT
        );
        ",
    )?;

    record_migration(conn, 1, "key_config")
}

/// V2: child lookup indexes used when loading the full graph.
fn migrate_v2_lookup_indexes(conn: &Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "
        CREATE INDEX idx_keyconf_key_device ON keyconf_key(device_id);
        CREATE INDEX idx_keyconf_certificate_key ON keyconf_certificate(key_id);
        CREATE INDEX idx_keyconf_cert_request_key ON keyconf_cert_request(key_id);
        ",
    )?;

    record_migration(conn, 2, "lookup_indexes")
}
