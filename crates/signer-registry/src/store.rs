//! SQLite-backed store collaborators over the key configuration pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use keyconf_database::{
    device_dao, writes, CertEntity, CertRequestEntity, DatabasePool, DeviceEntity, KeyEntity,
};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::services::{
    CertRequestWriteService, CertWriteService, KeyConfStore, KeyWriteService, TokenWriteService,
};

/// Every store collaborator, backed by one [`DatabasePool`].
///
/// Each call runs in its own transaction. Reads use a deferred transaction
/// so the whole graph is loaded from one consistent view.
#[derive(Clone)]
pub struct SqliteKeyConf {
    pool: Arc<DatabasePool>,
}

impl SqliteKeyConf {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    /// Stored PIN hash of a token. `None` if the token row is missing.
    #[cfg(test)]
    pub(crate) fn pin_hash(&self, token_id: i64) -> StoreResult<Option<Option<Vec<u8>>>> {
        self.read(|conn| writes::find_device_pin_hash(conn, token_id))
    }

    fn read<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> keyconf_database::DatabaseResult<T>,
    {
        self.pool
            .in_read_transaction(|tx| f(tx).map_err(StoreError::from))
    }

    fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> keyconf_database::DatabaseResult<T>,
    {
        self.pool
            .in_transaction(|tx| f(tx).map_err(StoreError::from))
    }
}

impl KeyConfStore for SqliteKeyConf {
    fn find_all(&self) -> StoreResult<Vec<DeviceEntity>> {
        self.read(device_dao::find_all)
    }

    fn find_all_ids(&self) -> StoreResult<Vec<i64>> {
        self.read(device_dao::find_all_ids)
    }

    fn replace_all(&self, devices: &[DeviceEntity]) -> StoreResult<()> {
        self.write(|conn| {
            let deleted = device_dao::delete_all(conn)?;
            device_dao::save_tokens(conn, devices)?;
            debug!(deleted, saved = devices.len(), "Replaced key configuration");
            Ok(())
        })
    }
}

impl TokenWriteService for SqliteKeyConf {
    fn save(&self, device: &DeviceEntity) -> StoreResult<i64> {
        self.write(|conn| writes::insert_device(conn, device))
    }

    fn update_friendly_name(&self, token_id: i64, friendly_name: &str) -> StoreResult<bool> {
        self.write(|conn| writes::update_device_friendly_name(conn, token_id, friendly_name))
    }

    fn set_pin(&self, token_id: i64, pin_hash: &[u8]) -> StoreResult<bool> {
        self.write(|conn| writes::update_device_pin_hash(conn, token_id, pin_hash))
    }

    fn update_pin(
        &self,
        token_id: i64,
        pin_hash: &[u8],
        keystores: &HashMap<i64, Vec<u8>>,
    ) -> StoreResult<bool> {
        self.write(|conn| {
            if !writes::update_device_pin_hash(conn, token_id, pin_hash)? {
                return Ok(false);
            }
            let updated = writes::update_key_keystores(conn, keystores)?;
            debug!(token_id, keystores = updated, "Stored new PIN hash and keystores");
            Ok(true)
        })
    }
}

impl KeyWriteService for SqliteKeyConf {
    fn save(&self, token_id: i64, key: &KeyEntity) -> StoreResult<i64> {
        self.write(|conn| writes::insert_key(conn, token_id, key))
    }

    fn delete(&self, key_id: i64) -> StoreResult<bool> {
        self.write(|conn| writes::delete_key(conn, key_id))
    }

    fn update_usage(&self, key_id: i64, usage: Option<String>) -> StoreResult<bool> {
        self.write(|conn| writes::update_key_usage(conn, key_id, usage.as_deref()))
    }

    fn update_friendly_name(&self, key_id: i64, friendly_name: &str) -> StoreResult<bool> {
        self.write(|conn| writes::update_key_friendly_name(conn, key_id, friendly_name))
    }

    fn update_label(&self, key_id: i64, label: &str) -> StoreResult<bool> {
        self.write(|conn| writes::update_key_label(conn, key_id, label))
    }

    fn update_public_key(&self, key_id: i64, public_key: &[u8]) -> StoreResult<bool> {
        self.write(|conn| writes::update_key_public_key(conn, key_id, public_key))
    }
}

impl CertWriteService for SqliteKeyConf {
    fn save(&self, key_id: i64, cert: &CertEntity) -> StoreResult<i64> {
        self.write(|conn| writes::insert_certificate(conn, key_id, cert))
    }

    fn delete(&self, cert_id: i64) -> StoreResult<bool> {
        self.write(|conn| writes::delete_certificate(conn, cert_id))
    }

    fn update_active(&self, cert_id: i64, active: bool) -> StoreResult<bool> {
        self.write(|conn| writes::update_certificate_active(conn, cert_id, active))
    }

    fn update_status(&self, cert_id: i64, status: &str) -> StoreResult<bool> {
        self.write(|conn| writes::update_certificate_status(conn, cert_id, status))
    }

    fn update_renewed_cert_hash(&self, cert_id: i64, hash: &str) -> StoreResult<bool> {
        self.write(|conn| writes::update_certificate_renewed_hash(conn, cert_id, hash))
    }

    fn update_renewal_error(&self, cert_id: i64, error: Option<String>) -> StoreResult<bool> {
        self.write(|conn| writes::update_certificate_renewal_error(conn, cert_id, error.as_deref()))
    }

    fn update_next_planned_renewal(
        &self,
        cert_id: i64,
        at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        self.write(|conn| writes::update_certificate_next_renewal(conn, cert_id, at))
    }

    fn update_ocsp_verify_error(&self, cert_id: i64, error: Option<String>) -> StoreResult<bool> {
        self.write(|conn| {
            writes::update_certificate_ocsp_verify_error(conn, cert_id, error.as_deref())
        })
    }
}

impl CertRequestWriteService for SqliteKeyConf {
    fn save(
        &self,
        key_id: i64,
        request: &CertRequestEntity,
        key_usage: Option<String>,
    ) -> StoreResult<i64> {
        self.write(|conn| {
            if let Some(usage) = key_usage.as_deref() {
                writes::update_key_usage(conn, key_id, Some(usage))?;
            }
            writes::insert_cert_request_row(conn, key_id, request)
        })
    }

    fn delete(&self, request_id: i64) -> StoreResult<bool> {
        self.write(|conn| writes::delete_cert_request(conn, request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyconf_database::PoolConfig;

    fn open_store() -> (tempfile::TempDir, SqliteKeyConf) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(&dir.path().join("keyconf.db"), PoolConfig::default())
            .unwrap();
        (dir, SqliteKeyConf::new(Arc::new(pool)))
    }

    fn soft_token() -> DeviceEntity {
        DeviceEntity {
            device_id: "0".to_string(),
            device_type: "softToken".to_string(),
            slot_id: Some("softToken-0".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_replace_all_swaps_the_whole_graph() {
        let (_dir, store) = open_store();
        TokenWriteService::save(&store, &soft_token()).unwrap();

        let replacement = DeviceEntity {
            device_id: "hw-1".to_string(),
            device_type: "pkcs11".to_string(),
            keys: vec![KeyEntity {
                key_id: "k1".to_string(),
                cert_requests: vec![CertRequestEntity {
                    cert_request_id: "r1".to_string(),
                    subject_name: "CN=ss1".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        store.replace_all(&[replacement]).unwrap();

        let devices = store.find_all().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "hw-1");
        assert_eq!(devices[0].keys[0].cert_requests[0].cert_request_id, "r1");
        assert_eq!(store.find_all_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_single_writes_round_trip() {
        let (_dir, store) = open_store();
        let token_row = TokenWriteService::save(&store, &soft_token()).unwrap();
        let key_row = KeyWriteService::save(
            &store,
            token_row,
            &KeyEntity {
                key_id: "k1".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(store.update_usage(key_row, Some("SIGNING".to_string())).unwrap());
        assert!(KeyWriteService::update_friendly_name(&store, key_row, "signing key").unwrap());

        let cert_row = CertWriteService::save(
            &store,
            key_row,
            &CertEntity {
                cert_id: "c1".to_string(),
                contents: vec![1, 2, 3],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(store.update_active(cert_row, true).unwrap());
        assert!(store.update_renewal_error(cert_row, Some("expired".to_string())).unwrap());

        let devices = store.find_all().unwrap();
        let key = &devices[0].keys[0];
        assert_eq!(key.usage.as_deref(), Some("SIGNING"));
        assert_eq!(key.friendly_name.as_deref(), Some("signing key"));
        assert!(key.certs[0].active);
        assert_eq!(key.certs[0].renewal_error.as_deref(), Some("expired"));

        assert!(CertWriteService::delete(&store, cert_row).unwrap());
        assert!(!CertWriteService::delete(&store, cert_row).unwrap());
    }

    #[test]
    fn test_cert_request_and_key_usage_commit_together() {
        let (_dir, store) = open_store();
        let token_row = TokenWriteService::save(&store, &soft_token()).unwrap();
        let key_row = KeyWriteService::save(
            &store,
            token_row,
            &KeyEntity {
                key_id: "k1".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let request = CertRequestEntity {
            cert_request_id: "r1".to_string(),
            subject_name: "CN=ss1".to_string(),
            ..Default::default()
        };
        CertRequestWriteService::save(&store, key_row, &request, None).unwrap();

        // Duplicate request id: the usage update rolls back with the insert.
        assert!(CertRequestWriteService::save(
            &store,
            key_row,
            &request,
            Some("SIGNING".to_string())
        )
        .is_err());
        let devices = store.find_all().unwrap();
        assert_eq!(devices[0].keys[0].usage, None);
        assert_eq!(devices[0].keys[0].cert_requests.len(), 1);

        let second = CertRequestEntity {
            cert_request_id: "r2".to_string(),
            ..request
        };
        CertRequestWriteService::save(&store, key_row, &second, Some("SIGNING".to_string()))
            .unwrap();
        let devices = store.find_all().unwrap();
        assert_eq!(devices[0].keys[0].usage.as_deref(), Some("SIGNING"));
        assert_eq!(devices[0].keys[0].cert_requests.len(), 2);
    }

    #[test]
    fn test_update_pin_writes_hash_and_keystores_together() {
        let (_dir, store) = open_store();
        let token_row = TokenWriteService::save(&store, &soft_token()).unwrap();
        let key_row = KeyWriteService::save(
            &store,
            token_row,
            &KeyEntity {
                key_id: "k1".to_string(),
                keystore: Some(vec![0; 4]),
                ..Default::default()
            },
        )
        .unwrap();

        let keystores = HashMap::from([(key_row, vec![9; 4])]);
        assert!(store.update_pin(token_row, &[7; 32], &keystores).unwrap());

        assert_eq!(store.pin_hash(token_row).unwrap(), Some(Some(vec![7; 32])));
        let devices = store.find_all().unwrap();
        assert_eq!(devices[0].keys[0].keystore, Some(vec![9; 4]));
    }

    #[test]
    fn test_update_pin_on_missing_token_writes_nothing() {
        let (_dir, store) = open_store();
        let token_row = TokenWriteService::save(&store, &soft_token()).unwrap();
        let key_row = KeyWriteService::save(
            &store,
            token_row,
            &KeyEntity {
                key_id: "k1".to_string(),
                keystore: Some(vec![0; 4]),
                ..Default::default()
            },
        )
        .unwrap();

        let keystores = HashMap::from([(key_row, vec![9; 4])]);
        assert!(!store.update_pin(token_row + 100, &[7; 32], &keystores).unwrap());

        let devices = store.find_all().unwrap();
        assert_eq!(devices[0].keys[0].keystore, Some(vec![0; 4]));
        assert_eq!(store.pin_hash(token_row + 100).unwrap(), None);
    }
}
