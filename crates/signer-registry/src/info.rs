//! Owned read models handed out by [`crate::TokenLookup`].
//!
//! These are copies taken from one snapshot. They never change after they
//! are built and holding one does not keep a snapshot alive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CertRequest, ClientId, KeyUsage, SignMechanism, TokenStatus};
use crate::runtime::{RuntimeCert, RuntimeKey, RuntimeToken};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenInfo {
    pub id: String,
    pub token_type: String,
    pub friendly_name: Option<String>,
    pub serial_number: Option<String>,
    pub label: Option<String>,
    pub slot_index: i32,
    pub read_only: bool,
    pub available: bool,
    pub active: bool,
    pub status: TokenStatus,
    pub info: BTreeMap<String, String>,
    pub keys: Vec<KeyInfo>,
}

impl TokenInfo {
    pub fn from_runtime(token: &RuntimeToken) -> Self {
        Self {
            id: token.id().to_string(),
            token_type: token.token_type().to_string(),
            friendly_name: token.friendly_name().map(str::to_string),
            serial_number: token.serial_number().map(str::to_string),
            label: token.label().map(str::to_string),
            slot_index: token.slot_index(),
            read_only: token.read_only(),
            available: token.is_available(),
            active: token.is_active(),
            status: token.status(),
            info: token.info(),
            keys: token.keys().iter().map(KeyInfo::from_runtime).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyInfo {
    pub id: String,
    pub friendly_name: Option<String>,
    pub label: Option<String>,
    pub public_key: Option<String>,
    pub usage: Option<KeyUsage>,
    pub sign_mechanism: SignMechanism,
    pub available: bool,
    pub certs: Vec<CertificateInfo>,
    pub cert_requests: Vec<CertRequestInfo>,
}

impl KeyInfo {
    pub fn from_runtime(key: &RuntimeKey) -> Self {
        Self {
            id: key.id().to_string(),
            friendly_name: key.friendly_name().map(str::to_string),
            label: key.label().map(str::to_string),
            public_key: key.public_key().map(str::to_string),
            usage: key.usage(),
            sign_mechanism: key.sign_mechanism(),
            available: key.is_available(),
            certs: key
                .certs()
                .iter()
                .map(|c| CertificateInfo::from_runtime(c))
                .collect(),
            cert_requests: key
                .cert_requests()
                .iter()
                .map(CertRequestInfo::from_request)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub active: bool,
    pub saved_to_configuration: bool,
    pub status: String,
    pub hash: String,
    #[serde(skip)]
    pub certificate: Vec<u8>,
    #[serde(skip)]
    pub ocsp_response: Option<Vec<u8>>,
    pub renewed_cert_hash: Option<String>,
    pub renewal_error: Option<String>,
    pub next_renewal_time: Option<DateTime<Utc>>,
    pub ocsp_verify_error: Option<String>,
    pub transient: bool,
}

impl CertificateInfo {
    pub fn from_runtime(cert: &RuntimeCert) -> Self {
        let c = cert.cert();
        Self {
            id: c.id.clone(),
            member_id: c.member_id.clone(),
            active: c.active,
            saved_to_configuration: c.saved_to_configuration,
            status: c.status.clone(),
            hash: c.hash.clone(),
            certificate: c.certificate.clone(),
            ocsp_response: cert.ocsp_response(),
            renewed_cert_hash: c.renewed_cert_hash.clone(),
            renewal_error: c.renewal_error.clone(),
            next_renewal_time: c.next_renewal_time,
            ocsp_verify_error: c.ocsp_verify_error.clone(),
            transient: c.transient,
        }
    }

    /// Member certificates belong to their member. A certificate without a
    /// member (an authentication certificate) belongs to nobody.
    pub fn belongs_to_member(&self, member_id: &ClientId) -> bool {
        self.member_id.as_ref() == Some(member_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertRequestInfo {
    pub id: String,
    pub member_id: Option<ClientId>,
    pub subject_name: String,
    pub subject_alt_name: Option<String>,
    pub certificate_profile: Option<String>,
}

impl CertRequestInfo {
    pub fn from_request(request: &CertRequest) -> Self {
        Self {
            id: request.id.clone(),
            member_id: request.member_id.clone(),
            subject_name: request.subject_name.clone(),
            subject_alt_name: request.subject_alt_name.clone(),
            certificate_profile: request.certificate_profile.clone(),
        }
    }
}

/// A token together with one of its keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenInfoAndKey {
    pub token: TokenInfo,
    pub key: KeyInfo,
}

impl TokenInfoAndKey {
    pub fn from_runtime(token: &RuntimeToken, key: &RuntimeKey) -> Self {
        Self {
            token: TokenInfo::from_runtime(token),
            key: KeyInfo::from_runtime(key),
        }
    }
}
