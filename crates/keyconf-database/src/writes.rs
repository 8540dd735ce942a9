//! Single-row writes keyed by storage id.
//!
//! Update and delete functions return `true` when a row was affected.

use crate::device_dao::{insert_cert, insert_cert_request};
use crate::{CertEntity, CertRequestEntity, DatabaseResult, DeviceEntity, KeyEntity};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;

// ==========================================
// Devices
// ==========================================

/// Insert a device row (children are ignored) and return its storage id.
pub fn insert_device(conn: &Connection, device: &DeviceEntity) -> DatabaseResult<i64> {
    conn.execute(
        "INSERT INTO keyconf_device (device_id, device_type, friendly_name, token_id, slot_id, pin_index, sign_mechanism, pin_hash, read_only)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            device.device_id,
            device.device_type,
            device.friendly_name,
            device.token_id,
            device.slot_id,
            device.pin_index,
            device.sign_mechanism,
            device.pin_hash,
            device.read_only,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_device_friendly_name(conn: &Connection, id: i64, name: &str) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_device SET friendly_name = ?2 WHERE id = ?1",
        params![id, name],
    )?;
    Ok(updated > 0)
}

pub fn update_device_pin_hash(conn: &Connection, id: i64, pin_hash: &[u8]) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_device SET pin_hash = ?2 WHERE id = ?1",
        params![id, pin_hash],
    )?;
    Ok(updated > 0)
}

/// Fetch the stored PIN hash of a device. `None` if the device is missing.
pub fn find_device_pin_hash(conn: &Connection, id: i64) -> DatabaseResult<Option<Option<Vec<u8>>>> {
    let result = conn.query_row(
        "SELECT pin_hash FROM keyconf_device WHERE id = ?1",
        params![id],
        |row| row.get::<_, Option<Vec<u8>>>(0),
    );
    match result {
        Ok(hash) => Ok(Some(hash)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Keys
// ==========================================

/// Insert a key row under `device_row` (children are ignored).
pub fn insert_key(conn: &Connection, device_row: i64, key: &KeyEntity) -> DatabaseResult<i64> {
    conn.execute(
        "INSERT INTO keyconf_key (device_id, key_id, friendly_name, label, public_key, usage, sign_mechanism, keystore)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            device_row,
            key.key_id,
            key.friendly_name,
            key.label,
            key.public_key,
            key.usage,
            key.sign_mechanism,
            key.keystore,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_key(conn: &Connection, id: i64) -> DatabaseResult<bool> {
    let deleted = conn.execute("DELETE FROM keyconf_key WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn update_key_usage(conn: &Connection, id: i64, usage: Option<&str>) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_key SET usage = ?2 WHERE id = ?1",
        params![id, usage],
    )?;
    Ok(updated > 0)
}

pub fn update_key_friendly_name(conn: &Connection, id: i64, name: &str) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_key SET friendly_name = ?2 WHERE id = ?1",
        params![id, name],
    )?;
    Ok(updated > 0)
}

pub fn update_key_label(conn: &Connection, id: i64, label: &str) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_key SET label = ?2 WHERE id = ?1",
        params![id, label],
    )?;
    Ok(updated > 0)
}

pub fn update_key_public_key(conn: &Connection, id: i64, public_key: &[u8]) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_key SET public_key = ?2 WHERE id = ?1",
        params![id, public_key],
    )?;
    Ok(updated > 0)
}

/// Replace the sealed keystores of several keys. Caller provides the
/// transaction so this can commit together with a PIN hash change.
pub fn update_key_keystores(conn: &Connection, keystores: &HashMap<i64, Vec<u8>>) -> DatabaseResult<usize> {
    let mut stmt = conn.prepare_cached("UPDATE keyconf_key SET keystore = ?2 WHERE id = ?1")?;
    let mut updated = 0;
    for (id, keystore) in keystores {
        updated += stmt.execute(params![id, keystore])?;
    }
    Ok(updated)
}

// ==========================================
// Certificates
// ==========================================

/// Insert a certificate under `key_row`; a storage id on `cert` is ignored.
pub fn insert_certificate(conn: &Connection, key_row: i64, cert: &CertEntity) -> DatabaseResult<i64> {
    let cert = CertEntity {
        id: None,
        ..cert.clone()
    };
    insert_cert(conn, key_row, &cert)
}

pub fn delete_certificate(conn: &Connection, id: i64) -> DatabaseResult<bool> {
    let deleted = conn.execute("DELETE FROM keyconf_certificate WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn update_certificate_active(conn: &Connection, id: i64, active: bool) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET active = ?2 WHERE id = ?1",
        params![id, active],
    )?;
    Ok(updated > 0)
}

pub fn update_certificate_status(conn: &Connection, id: i64, status: &str) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(updated > 0)
}

pub fn update_certificate_renewed_hash(conn: &Connection, id: i64, hash: &str) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET renewed_cert_hash = ?2 WHERE id = ?1",
        params![id, hash],
    )?;
    Ok(updated > 0)
}

pub fn update_certificate_renewal_error(
    conn: &Connection,
    id: i64,
    error: Option<&str>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET renewal_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(updated > 0)
}

pub fn update_certificate_next_renewal(
    conn: &Connection,
    id: i64,
    at: Option<DateTime<Utc>>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET next_renewal_time = ?2 WHERE id = ?1",
        params![id, at.map(|t| t.to_rfc3339())],
    )?;
    Ok(updated > 0)
}

pub fn update_certificate_ocsp_verify_error(
    conn: &Connection,
    id: i64,
    error: Option<&str>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        "UPDATE keyconf_certificate SET ocsp_verify_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(updated > 0)
}

// ==========================================
// Certificate requests
// ==========================================

/// Insert a certificate request under `key_row`; a storage id is ignored.
pub fn insert_cert_request_row(
    conn: &Connection,
    key_row: i64,
    request: &CertRequestEntity,
) -> DatabaseResult<i64> {
    let request = CertRequestEntity {
        id: None,
        ..request.clone()
    };
    insert_cert_request(conn, key_row, &request)
}

pub fn delete_cert_request(conn: &Connection, id: i64) -> DatabaseResult<bool> {
    let deleted = conn.execute("DELETE FROM keyconf_cert_request WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device_dao, run_migrations};

    fn setup() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();

        let device = insert_device(
            &conn,
            &DeviceEntity {
                device_id: "0".to_string(),
                device_type: "softToken".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let key = insert_key(
            &conn,
            device,
            &KeyEntity {
                key_id: "key1".to_string(),
                keystore: Some(vec![9]),
                ..Default::default()
            },
        )
        .unwrap();
        (conn, device, key)
    }

    #[test]
    fn test_pin_hash_update_and_read() {
        let (conn, device, _) = setup();

        assert_eq!(find_device_pin_hash(&conn, device).unwrap(), Some(None));
        assert!(update_device_pin_hash(&conn, device, &[7, 7]).unwrap());
        assert_eq!(find_device_pin_hash(&conn, device).unwrap(), Some(Some(vec![7, 7])));
        assert_eq!(find_device_pin_hash(&conn, 999).unwrap(), None);
    }

    #[test]
    fn test_certificate_updates() {
        let (conn, _, key) = setup();
        let cert = insert_certificate(
            &conn,
            key,
            &CertEntity {
                id: Some(12345),
                cert_id: "cert1".to_string(),
                contents: vec![1],
                ..Default::default()
            },
        )
        .unwrap();
        assert_ne!(cert, 12345);

        assert!(update_certificate_active(&conn, cert, true).unwrap());
        assert!(update_certificate_status(&conn, cert, "registered").unwrap());
        assert!(update_certificate_renewal_error(&conn, cert, Some("failed")).unwrap());

        let devices = device_dao::find_all(&conn).unwrap();
        let stored = &devices[0].keys[0].certs[0];
        assert!(stored.active);
        assert_eq!(stored.status.as_deref(), Some("registered"));
        assert_eq!(stored.renewal_error.as_deref(), Some("failed"));

        assert!(delete_certificate(&conn, cert).unwrap());
        assert!(!delete_certificate(&conn, cert).unwrap());
    }

    #[test]
    fn test_update_key_keystores() {
        let (conn, _, key) = setup();
        let mut keystores = HashMap::new();
        keystores.insert(key, vec![1, 2, 3]);

        assert_eq!(update_key_keystores(&conn, &keystores).unwrap(), 1);
        let devices = device_dao::find_all(&conn).unwrap();
        assert_eq!(devices[0].keys[0].keystore, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_update_missing_row_returns_false() {
        let (conn, _, _) = setup();
        assert!(!update_key_usage(&conn, 999, Some("SIGNING")).unwrap());
        assert!(!delete_cert_request(&conn, 999).unwrap());
    }
}
