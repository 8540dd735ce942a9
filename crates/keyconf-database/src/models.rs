//! Entity records for the key configuration tables.
//!
//! The `id` fields are storage primary keys: `None` until inserted. The
//! `*_id` text fields carry the caller-facing external identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A token (software token or hardware slot) with its full key graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceEntity {
    pub id: Option<i64>,
    pub device_id: String,
    pub device_type: String,
    pub friendly_name: Option<String>,
    /// Hardware serial number.
    pub token_id: Option<String>,
    /// Hardware token label.
    pub slot_id: Option<String>,
    pub pin_index: i32,
    pub sign_mechanism: Option<String>,
    pub pin_hash: Option<Vec<u8>>,
    pub read_only: bool,
    pub keys: Vec<KeyEntity>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyEntity {
    pub id: Option<i64>,
    pub key_id: String,
    pub friendly_name: Option<String>,
    pub label: Option<String>,
    pub public_key: Option<Vec<u8>>,
    pub usage: Option<String>,
    pub sign_mechanism: Option<String>,
    /// Sealed software keystore.
    pub keystore: Option<Vec<u8>>,
    pub certs: Vec<CertEntity>,
    pub cert_requests: Vec<CertRequestEntity>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CertEntity {
    pub id: Option<i64>,
    pub cert_id: String,
    pub member_id: Option<String>,
    pub active: bool,
    pub status: Option<String>,
    pub contents: Vec<u8>,
    pub renewed_cert_hash: Option<String>,
    pub renewal_error: Option<String>,
    pub next_renewal_time: Option<DateTime<Utc>>,
    pub ocsp_verify_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CertRequestEntity {
    pub id: Option<i64>,
    pub cert_request_id: String,
    pub member_id: Option<String>,
    pub subject_name: String,
    pub subject_alt_name: Option<String>,
    pub certificate_profile: Option<String>,
}
