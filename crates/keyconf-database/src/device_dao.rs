//! Bulk graph queries over the whole key configuration.
//!
//! These are only used to load or replace the complete device graph; the
//! callers wrap them in a transaction (see [`crate::DatabasePool`]).

use crate::{CertEntity, CertRequestEntity, DatabaseResult, DeviceEntity, KeyEntity};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use tracing::debug;

/// Load every device with its keys, certificates and certificate requests.
///
/// Devices are ordered by storage id; children keep their insertion order.
pub fn find_all(conn: &Connection) -> DatabaseResult<Vec<DeviceEntity>> {
    let mut certs_by_key = load_certs(conn)?;
    let mut requests_by_key = load_cert_requests(conn)?;

    let mut keys_by_device: HashMap<i64, Vec<KeyEntity>> = HashMap::new();
    {
        let mut stmt = conn.prepare_cached(
            "SELECT id, device_id, key_id, friendly_name, label, public_key, usage, sign_mechanism, keystore
             FROM keyconf_key ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let device_id: i64 = row.get(1)?;
            Ok((
                device_id,
                KeyEntity {
                    id: Some(id),
                    key_id: row.get(2)?,
                    friendly_name: row.get(3)?,
                    label: row.get(4)?,
                    public_key: row.get(5)?,
                    usage: row.get(6)?,
                    sign_mechanism: row.get(7)?,
                    keystore: row.get(8)?,
                    certs: Vec::new(),
                    cert_requests: Vec::new(),
                },
            ))
        })?;
        for row in rows {
            let (device_id, mut key) = row?;
            if let Some(id) = key.id {
                key.certs = certs_by_key.remove(&id).unwrap_or_default();
                key.cert_requests = requests_by_key.remove(&id).unwrap_or_default();
            }
            keys_by_device.entry(device_id).or_default().push(key);
        }
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, device_id, device_type, friendly_name, token_id, slot_id, pin_index, sign_mechanism, pin_hash, read_only
         FROM keyconf_device ORDER BY id",
    )?;
    let devices = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            Ok(DeviceEntity {
                id: Some(id),
                device_id: row.get(1)?,
                device_type: row.get(2)?,
                friendly_name: row.get(3)?,
                token_id: row.get(4)?,
                slot_id: row.get(5)?,
                pin_index: row.get(6)?,
                sign_mechanism: row.get(7)?,
                pin_hash: row.get(8)?,
                read_only: row.get(9)?,
                keys: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut device| {
            if let Some(id) = device.id {
                device.keys = keys_by_device.remove(&id).unwrap_or_default();
            }
            device
        })
        .collect::<Vec<_>>();

    debug!(devices = devices.len(), "Loaded key configuration graph");
    Ok(devices)
}

/// Storage ids of every device.
pub fn find_all_ids(conn: &Connection) -> DatabaseResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM keyconf_device ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Delete every device. Keys, certificates and requests cascade.
pub fn delete_all(conn: &Connection) -> DatabaseResult<usize> {
    let deleted = conn.execute("DELETE FROM keyconf_device", [])?;
    debug!(deleted, "Deleted all devices");
    Ok(deleted)
}

/// Insert a complete device graph.
///
/// Entities that already carry a storage id keep it, so a delete-and-reinsert
/// cycle does not renumber existing rows.
pub fn save_tokens(conn: &Connection, devices: &[DeviceEntity]) -> DatabaseResult<()> {
    for device in devices {
        conn.execute(
            "INSERT INTO keyconf_device (id, device_id, device_type, friendly_name, token_id, slot_id, pin_index, sign_mechanism, pin_hash, read_only)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                device.id,
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
        let device_row = conn.last_insert_rowid();

        for key in &device.keys {
            conn.execute(
                "INSERT INTO keyconf_key (id, device_id, key_id, friendly_name, label, public_key, usage, sign_mechanism, keystore)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key.id,
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
            let key_row = conn.last_insert_rowid();

            for cert in &key.certs {
                insert_cert(conn, key_row, cert)?;
            }
            for request in &key.cert_requests {
                insert_cert_request(conn, key_row, request)?;
            }
        }
    }

    debug!(devices = devices.len(), "Saved key configuration graph");
    Ok(())
}

pub(crate) fn insert_cert(conn: &Connection, key_row: i64, cert: &CertEntity) -> DatabaseResult<i64> {
    conn.execute(
        "INSERT INTO keyconf_certificate (id, key_id, cert_id, member_id, active, status, contents, renewed_cert_hash, renewal_error, next_renewal_time, ocsp_verify_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            cert.id,
            key_row,
            cert.cert_id,
            cert.member_id,
            cert.active,
            cert.status,
            cert.contents,
            cert.renewed_cert_hash,
            cert.renewal_error,
            cert.next_renewal_time.map(|t| t.to_rfc3339()),
            cert.ocsp_verify_error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn insert_cert_request(
    conn: &Connection,
    key_row: i64,
    request: &CertRequestEntity,
) -> DatabaseResult<i64> {
    conn.execute(
        "INSERT INTO keyconf_cert_request (id, key_id, cert_request_id, member_id, subject_name, subject_alt_name, certificate_profile)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            request.id,
            key_row,
            request.cert_request_id,
            request.member_id,
            request.subject_name,
            request.subject_alt_name,
            request.certificate_profile,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_certs(conn: &Connection) -> DatabaseResult<HashMap<i64, Vec<CertEntity>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, key_id, cert_id, member_id, active, status, contents, renewed_cert_hash, renewal_error, next_renewal_time, ocsp_verify_error
         FROM keyconf_certificate ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(1)?,
            CertEntity {
                id: Some(row.get(0)?),
                cert_id: row.get(2)?,
                member_id: row.get(3)?,
                active: row.get(4)?,
                status: row.get(5)?,
                contents: row.get(6)?,
                renewed_cert_hash: row.get(7)?,
                renewal_error: row.get(8)?,
                next_renewal_time: parse_optional_datetime(row, 9)?,
                ocsp_verify_error: row.get(10)?,
            },
        ))
    })?;

    let mut grouped: HashMap<i64, Vec<CertEntity>> = HashMap::new();
    for row in rows {
        let (key_row, cert) = row?;
        grouped.entry(key_row).or_default().push(cert);
    }
    Ok(grouped)
}

fn load_cert_requests(conn: &Connection) -> DatabaseResult<HashMap<i64, Vec<CertRequestEntity>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, key_id, cert_request_id, member_id, subject_name, subject_alt_name, certificate_profile
         FROM keyconf_cert_request ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(1)?,
            CertRequestEntity {
                id: Some(row.get(0)?),
                cert_request_id: row.get(2)?,
                member_id: row.get(3)?,
                subject_name: row.get(4)?,
                subject_alt_name: row.get(5)?,
                certificate_profile: row.get(6)?,
            },
        ))
    })?;

    let mut grouped: HashMap<i64, Vec<CertRequestEntity>> = HashMap::new();
    for row in rows {
        let (key_row, request) = row?;
        grouped.entry(key_row).or_default().push(request);
    }
    Ok(grouped)
}

fn parse_optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}
