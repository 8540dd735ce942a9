//! Runtime wrappers around the domain model.
//!
//! A runtime wrapper holds two kinds of data:
//!
//! - persisted-derived fields, copied from the loaded [`Token`]/[`Key`]/
//!   [`Cert`] and never changed once the wrapper is published;
//! - runtime-only fields (activation, availability, status, definition,
//!   transient certificates, OCSP responses) behind interior mutability.
//!
//! Token and key runtime state lives in an `Arc` that a merge hands to the
//! wrapper replacing this one, so a flag flipped on the old wrapper while a
//! merge is running is still visible after the swap.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::definition::TokenDefinition;
use crate::model::{Cert, CertRequest, ClientId, Key, KeyUsage, SignMechanism, Token, TokenStatus};

/// Runtime-only token state shared across merges.
#[derive(Debug, Default)]
pub struct TokenState {
    active: AtomicBool,
    available: AtomicBool,
    status: RwLock<TokenStatus>,
    definition: RwLock<Option<TokenDefinition>>,
    info: RwLock<BTreeMap<String, String>>,
}

/// Runtime-only key state shared across merges.
#[derive(Debug, Default)]
pub struct KeyState {
    available: AtomicBool,
    transient_certs: RwLock<Vec<Arc<RuntimeCert>>>,
}

#[derive(Debug)]
pub struct RuntimeToken {
    /// Header only; `keys` is always empty here.
    token: Token,
    state: Arc<TokenState>,
    keys: Vec<RuntimeKey>,
}

impl RuntimeToken {
    /// Wrap a freshly loaded token with new runtime state.
    pub fn from_token(token: Token) -> Self {
        let state = Arc::new(TokenState {
            active: AtomicBool::new(token.active),
            info: RwLock::new(token.info.clone()),
            ..Default::default()
        });
        Self::with_state(token, state, RuntimeKey::from_key)
    }

    /// Wrap a loaded token reusing runtime state from a superseded wrapper.
    pub(crate) fn with_state<F>(mut token: Token, state: Arc<TokenState>, mut wrap_key: F) -> Self
    where
        F: FnMut(Key) -> RuntimeKey,
    {
        let keys = std::mem::take(&mut token.keys)
            .into_iter()
            .map(&mut wrap_key)
            .collect();
        Self { token, state, keys }
    }

    pub(crate) fn state(&self) -> &Arc<TokenState> {
        &self.state
    }

    pub fn id(&self) -> &str {
        &self.token.id
    }

    pub fn internal_id(&self) -> Option<i64> {
        self.token.internal_id
    }

    pub fn token_type(&self) -> &str {
        &self.token.token_type
    }

    pub fn is_software(&self) -> bool {
        self.token.is_software()
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.token.friendly_name.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.token.serial_number.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.token.label.as_deref()
    }

    pub fn slot_index(&self) -> i32 {
        self.token.slot_index
    }

    pub fn read_only(&self) -> bool {
        self.token.read_only
    }

    pub fn sign_mechanism(&self) -> Option<SignMechanism> {
        self.token.sign_mechanism
    }

    pub fn pin_hash(&self) -> Option<&[u8]> {
        self.token.pin_hash.as_deref()
    }

    pub fn keys(&self) -> &[RuntimeKey] {
        &self.keys
    }

    pub fn key(&self, key_id: &str) -> Option<&RuntimeKey> {
        self.keys.iter().find(|k| k.id() == key_id)
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.state.active.store(active, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    pub fn status(&self) -> TokenStatus {
        *self.state.status.read()
    }

    pub fn set_status(&self, status: TokenStatus) {
        *self.state.status.write() = status;
    }

    pub fn definition(&self) -> Option<TokenDefinition> {
        self.state.definition.read().clone()
    }

    pub fn set_definition(&self, definition: Option<TokenDefinition>) {
        *self.state.definition.write() = definition;
    }

    pub fn info(&self) -> BTreeMap<String, String> {
        self.state.info.read().clone()
    }

    pub fn set_info(&self, info: BTreeMap<String, String>) {
        *self.state.info.write() = info;
    }

    /// Batch signing is fixed on for the software token. Hardware tokens take
    /// it from their definition and default to on until one is attached.
    pub fn is_batch_signing_enabled(&self) -> bool {
        if self.is_software() {
            return true;
        }
        self.state
            .definition
            .read()
            .as_ref()
            .map(TokenDefinition::batch_signing_enabled)
            .unwrap_or(true)
    }

    /// Rebuild the full domain value, runtime fields and transient certs
    /// included.
    pub fn to_token(&self) -> Token {
        Token {
            active: self.is_active(),
            info: self.info(),
            keys: self.keys.iter().map(RuntimeKey::to_key).collect(),
            ..self.token.clone()
        }
    }
}

#[derive(Debug)]
pub struct RuntimeKey {
    /// Header only; `certs` and `cert_requests` are always empty here.
    key: Key,
    state: Arc<KeyState>,
    certs: Vec<Arc<RuntimeCert>>,
    cert_requests: Vec<CertRequest>,
}

impl RuntimeKey {
    pub fn from_key(key: Key) -> Self {
        let state = Arc::new(KeyState {
            available: AtomicBool::new(key.available),
            ..Default::default()
        });
        Self::with_state(key, state, |cert| Arc::new(RuntimeCert::new(cert)))
    }

    pub(crate) fn with_state<F>(mut key: Key, state: Arc<KeyState>, wrap_cert: F) -> Self
    where
        F: FnMut(Cert) -> Arc<RuntimeCert>,
    {
        let (transient, durable): (Vec<Cert>, Vec<Cert>) =
            std::mem::take(&mut key.certs).into_iter().partition(|c| c.transient);
        let certs = durable.into_iter().map(wrap_cert).collect();
        let cert_requests = std::mem::take(&mut key.cert_requests);

        if !transient.is_empty() {
            state
                .transient_certs
                .write()
                .extend(transient.into_iter().map(|c| Arc::new(RuntimeCert::new(c))));
        }

        Self {
            key,
            state,
            certs,
            cert_requests,
        }
    }

    pub(crate) fn state(&self) -> &Arc<KeyState> {
        &self.state
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn internal_id(&self) -> Option<i64> {
        self.key.internal_id
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.key.friendly_name.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.key.label.as_deref()
    }

    pub fn public_key(&self) -> Option<&str> {
        self.key.public_key.as_deref()
    }

    pub fn sign_mechanism(&self) -> SignMechanism {
        self.key.sign_mechanism
    }

    pub fn usage(&self) -> Option<KeyUsage> {
        self.key.usage
    }

    pub fn software_keystore(&self) -> Option<&[u8]> {
        self.key.software_keystore.as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::Acquire)
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    /// Certificates loaded from the store.
    pub fn durable_certs(&self) -> &[Arc<RuntimeCert>] {
        &self.certs
    }

    pub fn transient_certs(&self) -> Vec<Arc<RuntimeCert>> {
        self.state.transient_certs.read().clone()
    }

    /// Durable certificates followed by transient ones.
    pub fn certs(&self) -> Vec<Arc<RuntimeCert>> {
        let mut all = self.certs.clone();
        all.extend(self.transient_certs());
        all
    }

    pub fn cert_requests(&self) -> &[CertRequest] {
        &self.cert_requests
    }

    pub fn find_cert_request(
        &self,
        member_id: Option<&ClientId>,
        subject_name: &str,
    ) -> Option<&CertRequest> {
        self.cert_requests
            .iter()
            .find(|r| r.matches(member_id, subject_name))
    }

    pub(crate) fn add_transient_cert(&self, cert: Cert) -> Arc<RuntimeCert> {
        let cert = Arc::new(RuntimeCert::new(Cert {
            transient: true,
            saved_to_configuration: false,
            ..cert
        }));
        self.state.transient_certs.write().push(Arc::clone(&cert));
        cert
    }

    pub(crate) fn remove_transient_cert(&self, cert_id: &str) -> bool {
        let mut certs = self.state.transient_certs.write();
        let before = certs.len();
        certs.retain(|c| c.id() != cert_id);
        certs.len() != before
    }

    /// Drop transient certs that now exist durably, by id or by hash.
    pub(crate) fn prune_transient_certs(&self) {
        let mut transient = self.state.transient_certs.write();
        transient.retain(|t| {
            !self
                .certs
                .iter()
                .any(|c| c.id() == t.id() || c.hash() == t.hash())
        });
    }

    pub fn to_key(&self) -> Key {
        Key {
            available: self.is_available(),
            certs: self.certs().iter().map(|c| c.to_cert()).collect(),
            cert_requests: self.cert_requests.clone(),
            ..self.key.clone()
        }
    }
}

#[derive(Debug)]
pub struct RuntimeCert {
    cert: Cert,
    ocsp_response: RwLock<Option<Vec<u8>>>,
}

impl RuntimeCert {
    pub fn new(mut cert: Cert) -> Self {
        let ocsp_response = RwLock::new(cert.ocsp_response.take());
        Self {
            cert,
            ocsp_response,
        }
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    pub fn id(&self) -> &str {
        &self.cert.id
    }

    pub fn internal_id(&self) -> Option<i64> {
        self.cert.internal_id
    }

    pub fn hash(&self) -> &str {
        &self.cert.hash
    }

    pub fn is_transient(&self) -> bool {
        self.cert.transient
    }

    pub fn ocsp_response(&self) -> Option<Vec<u8>> {
        self.ocsp_response.read().clone()
    }

    pub fn set_ocsp_response(&self, response: Option<Vec<u8>>) {
        *self.ocsp_response.write() = response;
    }

    pub fn to_cert(&self) -> Cert {
        Cert {
            ocsp_response: self.ocsp_response(),
            ..self.cert.clone()
        }
    }
}
