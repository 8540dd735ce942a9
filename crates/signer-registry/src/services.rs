//! Durable store collaborator contracts.
//!
//! The registry never talks to SQLite directly. [`KeyConfStore`] is the
//! bulk gateway used by [`crate::TokenConf`]; the write services are the
//! single-entity writes the managers delegate to. Every write is keyed by
//! the storage id of the target and is transactional on its own.
//!
//! [`crate::store::SqliteKeyConf`] implements all of them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use keyconf_database::{CertEntity, CertRequestEntity, DeviceEntity, KeyEntity};
#[cfg(test)]
use mockall::automock;

use crate::error::StoreResult;

/// Bulk access to the whole key configuration graph.
#[cfg_attr(test, automock)]
pub trait KeyConfStore: Send + Sync {
    /// Load every device with its children in one read transaction.
    fn find_all(&self) -> StoreResult<Vec<DeviceEntity>>;

    /// Storage ids of every device.
    fn find_all_ids(&self) -> StoreResult<Vec<i64>>;

    /// Delete every device and insert `devices` in one write transaction.
    fn replace_all(&self, devices: &[DeviceEntity]) -> StoreResult<()>;
}

#[cfg_attr(test, automock)]
pub trait TokenWriteService: Send + Sync {
    /// Insert a token row and return its storage id.
    fn save(&self, device: &DeviceEntity) -> StoreResult<i64>;

    fn update_friendly_name(&self, token_id: i64, friendly_name: &str) -> StoreResult<bool>;

    fn set_pin(&self, token_id: i64, pin_hash: &[u8]) -> StoreResult<bool>;

    /// Store a new PIN hash together with the keystores re-sealed under the
    /// new PIN, all or nothing. `keystores` is keyed by key storage id.
    fn update_pin(
        &self,
        token_id: i64,
        pin_hash: &[u8],
        keystores: &HashMap<i64, Vec<u8>>,
    ) -> StoreResult<bool>;
}

#[cfg_attr(test, automock)]
pub trait KeyWriteService: Send + Sync {
    /// Insert a key row under a token and return its storage id.
    fn save(&self, token_id: i64, key: &KeyEntity) -> StoreResult<i64>;

    fn delete(&self, key_id: i64) -> StoreResult<bool>;

    fn update_usage(&self, key_id: i64, usage: Option<String>) -> StoreResult<bool>;

    fn update_friendly_name(&self, key_id: i64, friendly_name: &str) -> StoreResult<bool>;

    fn update_label(&self, key_id: i64, label: &str) -> StoreResult<bool>;

    fn update_public_key(&self, key_id: i64, public_key: &[u8]) -> StoreResult<bool>;
}

#[cfg_attr(test, automock)]
pub trait CertWriteService: Send + Sync {
    /// Insert a certificate under a key and return its storage id.
    fn save(&self, key_id: i64, cert: &CertEntity) -> StoreResult<i64>;

    fn delete(&self, cert_id: i64) -> StoreResult<bool>;

    fn update_active(&self, cert_id: i64, active: bool) -> StoreResult<bool>;

    fn update_status(&self, cert_id: i64, status: &str) -> StoreResult<bool>;

    fn update_renewed_cert_hash(&self, cert_id: i64, hash: &str) -> StoreResult<bool>;

    fn update_renewal_error(&self, cert_id: i64, error: Option<String>) -> StoreResult<bool>;

    fn update_next_planned_renewal(
        &self,
        cert_id: i64,
        at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    fn update_ocsp_verify_error(&self, cert_id: i64, error: Option<String>) -> StoreResult<bool>;
}

#[cfg_attr(test, automock)]
pub trait CertRequestWriteService: Send + Sync {
    /// Insert a certificate request under a key and return its storage id.
    /// A `key_usage` is written to the key in the same transaction.
    fn save(
        &self,
        key_id: i64,
        request: &CertRequestEntity,
        key_usage: Option<String>,
    ) -> StoreResult<i64>;

    fn delete(&self, request_id: i64) -> StoreResult<bool>;
}
