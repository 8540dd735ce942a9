//! Domain model: one loaded snapshot of tokens and their descendants.
//!
//! These are plain values. Ownership is strictly hierarchical: a [`Token`]
//! owns its [`Key`]s and a key owns its [`Cert`]s and [`CertRequest`]s.
//! Nothing points back up the tree; lookups by id go through the indexes of
//! [`crate::TokenSnapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Module type of the built-in software token.
pub const SOFTWARE_MODULE_TYPE: &str = "softToken";

/// External id of the built-in software token.
pub const SOFTWARE_TOKEN_ID: &str = "0";

/// Lowercase hex SHA-1 of DER certificate bytes.
pub fn calculate_cert_hash(certificate: &[u8]) -> String {
    hex::encode(Sha1::digest(certificate))
}

/// What a key is used for. Once set it is fixed for the key's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyUsage {
    Signing,
    Authentication,
}

impl KeyUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signing => "SIGNING",
            Self::Authentication => "AUTHENTICATION",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIGNING" => Ok(Self::Signing),
            "AUTHENTICATION" => Ok(Self::Authentication),
            other => Err(format!("unknown key usage: {}", other)),
        }
    }
}

/// PKCS#11 signing mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignMechanism {
    #[serde(rename = "CKM_RSA_PKCS")]
    RsaPkcs,
    #[serde(rename = "CKM_RSA_PKCS_PSS")]
    RsaPkcsPss,
    #[serde(rename = "CKM_ECDSA")]
    Ecdsa,
}

impl SignMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaPkcs => "CKM_RSA_PKCS",
            Self::RsaPkcsPss => "CKM_RSA_PKCS_PSS",
            Self::Ecdsa => "CKM_ECDSA",
        }
    }
}

impl Default for SignMechanism {
    fn default() -> Self {
        Self::RsaPkcs
    }
}

impl fmt::Display for SignMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignMechanism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CKM_RSA_PKCS" => Ok(Self::RsaPkcs),
            "CKM_RSA_PKCS_PSS" => Ok(Self::RsaPkcsPss),
            "CKM_ECDSA" => Ok(Self::Ecdsa),
            other => Err(format!("unknown sign mechanism: {}", other)),
        }
    }
}

/// Key algorithm a token can generate keys for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

/// Runtime status of a token as reported by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    #[default]
    Ok,
    UserPinLocked,
    UserPinIncorrect,
    UserPinInvalid,
    UserPinExpired,
    UserPinCountLow,
    UserPinFinalTry,
    NotInitialized,
}

/// Identifier of the member (client) a certificate or request belongs to,
/// e.g. `EE/GOV/1234` or `EE/GOV/1234/SUBSYSTEM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cryptographic token: the software keystore or one hardware slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    /// Stable caller-facing id.
    pub id: String,
    /// Storage primary key, `None` until persisted.
    pub internal_id: Option<i64>,
    /// Module type (`softToken` or the hardware module name).
    pub token_type: String,
    pub friendly_name: Option<String>,
    pub serial_number: Option<String>,
    pub label: Option<String>,
    pub slot_index: i32,
    pub read_only: bool,
    pub active: bool,
    pub info: BTreeMap<String, String>,
    pub sign_mechanism: Option<SignMechanism>,
    pub pin_hash: Option<Vec<u8>>,
    pub keys: Vec<Key>,
}

impl Token {
    pub fn new(token_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token_type: token_type.into(),
            ..Default::default()
        }
    }

    pub fn is_software(&self) -> bool {
        self.token_type == SOFTWARE_MODULE_TYPE
    }
}

/// A key pair held by a token.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Key {
    pub id: String,
    pub internal_id: Option<i64>,
    pub friendly_name: Option<String>,
    pub label: Option<String>,
    /// Base64 encoded public key.
    pub public_key: Option<String>,
    pub sign_mechanism: SignMechanism,
    pub usage: Option<KeyUsage>,
    /// Runtime only.
    pub available: bool,
    /// Sealed private key material of software token keys.
    pub software_keystore: Option<Vec<u8>>,
    pub certs: Vec<Cert>,
    pub cert_requests: Vec<CertRequest>,
}

impl Key {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Keys with neither a saved certificate nor a request carry no durable
    /// value and are not written back to the store.
    pub fn has_certs_or_cert_requests(&self) -> bool {
        self.certs.iter().any(|c| c.saved_to_configuration) || !self.cert_requests.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cert {
    pub id: String,
    pub internal_id: Option<i64>,
    /// DER bytes.
    pub certificate: Vec<u8>,
    /// SHA-1 of `certificate`, see [`calculate_cert_hash`].
    pub hash: String,
    pub active: bool,
    pub status: String,
    pub member_id: Option<ClientId>,
    pub saved_to_configuration: bool,
    pub next_renewal_time: Option<DateTime<Utc>>,
    pub renewal_error: Option<String>,
    pub renewed_cert_hash: Option<String>,
    pub ocsp_verify_error: Option<String>,
    /// Runtime only.
    pub ocsp_response: Option<Vec<u8>>,
    /// Runtime only: the cert exists in memory and was never persisted.
    pub transient: bool,
}

impl Cert {
    pub fn new(id: impl Into<String>, certificate: Vec<u8>) -> Self {
        let hash = calculate_cert_hash(&certificate);
        Self {
            id: id.into(),
            certificate,
            hash,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CertRequest {
    pub id: String,
    pub internal_id: Option<i64>,
    pub member_id: Option<ClientId>,
    pub subject_name: String,
    pub subject_alt_name: Option<String>,
    pub certificate_profile: Option<String>,
}

impl CertRequest {
    /// Whether this request was made for `subject_name` on behalf of
    /// `member_id`. Subjects compare case-insensitively; a missing member
    /// matches any member.
    pub fn matches(&self, member_id: Option<&ClientId>, subject_name: &str) -> bool {
        let member_matches = match member_id {
            None => true,
            Some(member) => self.member_id.as_ref() == Some(member),
        };
        member_matches && self.subject_name.eq_ignore_ascii_case(subject_name)
    }
}
