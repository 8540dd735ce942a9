//! Gateway between the registry and the durable key configuration.
//!
//! [`TokenConf`] loads the whole device graph, fingerprints it with a
//! structural hash, and writes a graph back only when that fingerprint has
//! moved. The hash covers persisted fields only and is independent of row
//! order and storage ids, so reading the same durable state twice always
//! yields the same value.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, error, info};

use crate::error::{StoreError, TokenConfError};
use crate::mapper;
use crate::model::{Cert, CertRequest, Key, Token};
use crate::services::KeyConfStore;

/// A loaded token graph paired with the hash of the store content it came
/// from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedTokens {
    tokens: Vec<Token>,
    entity_set_hash: String,
}

impl LoadedTokens {
    pub fn new(tokens: Vec<Token>, entity_set_hash: String) -> Self {
        Self {
            tokens,
            entity_set_hash,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    pub fn entity_set_hash(&self) -> &str {
        &self.entity_set_hash
    }
}

pub struct TokenConf {
    store: Arc<dyn KeyConfStore>,
}

impl TokenConf {
    pub fn new(store: Arc<dyn KeyConfStore>) -> Self {
        Self { store }
    }

    /// Load every token from the store in one read transaction.
    pub fn retrieve_tokens_from_db(&self) -> Result<LoadedTokens, TokenConfError> {
        let devices = self.store.find_all().map_err(TokenConfError::new)?;
        let tokens = devices
            .into_iter()
            .map(mapper::token_from_entity)
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(TokenConfError::new)?;

        let hash = entity_set_hash(&tokens, |_| true);
        debug!(tokens = tokens.len(), hash = %hash, "Retrieved tokens from key configuration");
        Ok(LoadedTokens::new(tokens, hash))
    }

    /// Persist `loaded` if its content moved away from its baseline hash.
    ///
    /// Returns `false` without touching the store when nothing changed.
    /// Keys without any saved certificate or request are not persisted.
    pub fn save(&self, loaded: &LoadedTokens) -> Result<bool, TokenConfError> {
        let current = entity_set_hash(loaded.tokens(), Key::has_certs_or_cert_requests);
        if current == loaded.entity_set_hash() {
            debug!("Key configuration unchanged, skipping save");
            return Ok(false);
        }

        let devices = loaded
            .tokens()
            .iter()
            .map(mapper::token_to_entity)
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(TokenConfError::new)?;

        self.store
            .replace_all(&devices)
            .map_err(TokenConfError::new)?;
        info!(devices = devices.len(), "Saved key configuration");
        Ok(true)
    }

    /// Cheap check comparing the stored device ids with the storage ids of
    /// the tokens held in memory. A failing check is logged and reported as
    /// unchanged.
    pub fn has_changed(&self, known: &HashSet<i64>) -> bool {
        let stored = match self.store.find_all_ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Key configuration change check failed, assuming unchanged");
                return false;
            }
        };

        stored.len() != known.len() || stored.iter().any(|id| !known.contains(id))
    }
}

/// SHA-256 over the persisted fields of `tokens`, restricted to the keys
/// accepted by `include_key`. Children are visited in external id order.
pub fn entity_set_hash<F>(tokens: &[Token], include_key: F) -> String
where
    F: Fn(&Key) -> bool,
{
    let mut hasher = Sha256::new();

    let mut tokens: Vec<&Token> = tokens.iter().collect();
    tokens.sort_by(|a, b| a.id.cmp(&b.id));
    put(&mut hasher, tokens.len().to_string().as_bytes());

    for token in tokens {
        hash_token(&mut hasher, token);

        let mut keys: Vec<&Key> = token.keys.iter().filter(|&k| include_key(k)).collect();
        keys.sort_by(|a, b| a.id.cmp(&b.id));
        put(&mut hasher, keys.len().to_string().as_bytes());

        for key in keys {
            hash_key(&mut hasher, key);

            let mut certs: Vec<&Cert> = key
                .certs
                .iter()
                .filter(|c| !c.transient && c.saved_to_configuration)
                .collect();
            certs.sort_by(|a, b| a.id.cmp(&b.id));
            put(&mut hasher, certs.len().to_string().as_bytes());
            for cert in certs {
                hash_cert(&mut hasher, cert);
            }

            let mut requests: Vec<&CertRequest> = key.cert_requests.iter().collect();
            requests.sort_by(|a, b| a.id.cmp(&b.id));
            put(&mut hasher, requests.len().to_string().as_bytes());
            for request in requests {
                hash_cert_request(&mut hasher, request);
            }
        }
    }

    hex::encode(hasher.finalize())
}

fn hash_token(h: &mut Sha256, token: &Token) {
    put(h, token.id.as_bytes());
    put(h, token.token_type.as_bytes());
    put_opt(h, token.friendly_name.as_deref().map(str::as_bytes));
    put_opt(h, token.serial_number.as_deref().map(str::as_bytes));
    put_opt(h, token.label.as_deref().map(str::as_bytes));
    put(h, &token.slot_index.to_le_bytes());
    put(h, &[token.read_only as u8]);
    put_opt(h, token.sign_mechanism.map(|m| m.as_str().as_bytes()));
    put_opt(h, token.pin_hash.as_deref());
}

fn hash_key(h: &mut Sha256, key: &Key) {
    put(h, key.id.as_bytes());
    put_opt(h, key.friendly_name.as_deref().map(str::as_bytes));
    put_opt(h, key.label.as_deref().map(str::as_bytes));
    put_opt(h, key.public_key.as_deref().map(str::as_bytes));
    put_opt(h, key.usage.map(|u| u.as_str().as_bytes()));
    put(h, key.sign_mechanism.as_str().as_bytes());
    put_opt(h, key.software_keystore.as_deref());
}

fn hash_cert(h: &mut Sha256, cert: &Cert) {
    put(h, cert.id.as_bytes());
    put_opt(h, cert.member_id.as_ref().map(|m| m.as_str().as_bytes()));
    put(h, &[cert.active as u8]);
    put(h, cert.status.as_bytes());
    put(h, &cert.certificate);
    put_opt(h, cert.renewed_cert_hash.as_deref().map(str::as_bytes));
    put_opt(h, cert.renewal_error.as_deref().map(str::as_bytes));
    let next_renewal = cert.next_renewal_time.map(|t| t.timestamp_millis().to_le_bytes());
    put_opt(h, next_renewal.as_ref().map(|b| b.as_slice()));
    put_opt(h, cert.ocsp_verify_error.as_deref().map(str::as_bytes));
}

fn hash_cert_request(h: &mut Sha256, request: &CertRequest) {
    put(h, request.id.as_bytes());
    put_opt(h, request.member_id.as_ref().map(|m| m.as_str().as_bytes()));
    put(h, request.subject_name.as_bytes());
    put_opt(h, request.subject_alt_name.as_deref().map(str::as_bytes));
    put_opt(h, request.certificate_profile.as_deref().map(str::as_bytes));
}

/// Length-prefixed so adjacent fields cannot run into each other.
fn put(h: &mut Sha256, bytes: &[u8]) {
    h.update((bytes.len() as u64).to_le_bytes());
    h.update(bytes);
}

fn put_opt(h: &mut Sha256, bytes: Option<&[u8]>) {
    match bytes {
        None => h.update([0u8]),
        Some(bytes) => {
            h.update([1u8]);
            put(h, bytes);
        }
    }
}
