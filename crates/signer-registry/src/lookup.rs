//! Read API over the current snapshot.
//!
//! Every call takes the published snapshot once and answers from it, so a
//! single answer never mixes two snapshots. Results are owned copies.

use std::sync::Arc;

use tracing::trace;

use crate::error::{SignerError, SignerResult};
use crate::info::{CertRequestInfo, CertificateInfo, KeyInfo, TokenInfo, TokenInfoAndKey};
use crate::model::{ClientId, KeyUsage, SignMechanism, TokenStatus};
use crate::registry::TokenRegistry;
use crate::runtime::{RuntimeKey, RuntimeToken};
use crate::snapshot::TokenSnapshot;

#[derive(Clone)]
pub struct TokenLookup {
    registry: Arc<TokenRegistry>,
}

impl TokenLookup {
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self { registry }
    }

    fn snapshot(&self) -> Arc<TokenSnapshot> {
        self.registry.current_tokens()
    }

    pub fn list_tokens(&self) -> Vec<TokenInfo> {
        trace!("list_tokens()");
        self.snapshot()
            .tokens()
            .iter()
            .map(TokenInfo::from_runtime)
            .collect()
    }

    pub fn find_token_info(&self, token_id: &str) -> SignerResult<TokenInfo> {
        trace!(token_id, "find_token_info()");
        let snapshot = self.snapshot();
        let token = find_token(&snapshot, token_id)?;
        Ok(TokenInfo::from_runtime(token))
    }

    pub fn list_keys(&self, token_id: &str) -> SignerResult<Vec<KeyInfo>> {
        trace!(token_id, "list_keys()");
        let snapshot = self.snapshot();
        let token = find_token(&snapshot, token_id)?;
        Ok(token.keys().iter().map(KeyInfo::from_runtime).collect())
    }

    pub fn find_token_info_for_key(&self, key_id: &str) -> SignerResult<TokenInfo> {
        trace!(key_id, "find_token_info_for_key()");
        let snapshot = self.snapshot();
        let (token, _) = find_key(&snapshot, key_id)?;
        Ok(TokenInfo::from_runtime(token))
    }

    pub fn find_token_and_key(&self, key_id: &str) -> SignerResult<TokenInfoAndKey> {
        trace!(key_id, "find_token_and_key()");
        let snapshot = self.snapshot();
        let (token, key) = find_key(&snapshot, key_id)?;
        Ok(TokenInfoAndKey::from_runtime(token, key))
    }

    pub fn find_token_and_key_for_cert_hash(&self, cert_hash: &str) -> SignerResult<TokenInfoAndKey> {
        trace!(cert_hash, "find_token_and_key_for_cert_hash()");
        let snapshot = self.snapshot();
        let found = snapshot
            .find_cert_by_hash(cert_hash)
            .ok_or_else(|| SignerError::CertWithHashNotFound(cert_hash.to_string()))?;
        Ok(TokenInfoAndKey::from_runtime(found.token, found.key))
    }

    pub fn find_token_and_key_for_cert_request(
        &self,
        cert_request_id: &str,
    ) -> SignerResult<TokenInfoAndKey> {
        trace!(cert_request_id, "find_token_and_key_for_cert_request()");
        let snapshot = self.snapshot();
        let found = snapshot
            .find_cert_request(cert_request_id)
            .ok_or_else(|| SignerError::CertRequestNotFound(cert_request_id.to_string()))?;
        Ok(TokenInfoAndKey::from_runtime(found.token, found.key))
    }

    pub fn find_token_id_for_key(&self, key_id: &str) -> SignerResult<String> {
        trace!(key_id, "find_token_id_for_key()");
        let snapshot = self.snapshot();
        let (token, _) = find_key(&snapshot, key_id)?;
        Ok(token.id().to_string())
    }

    /// Id of the software token, if one has been created.
    pub fn software_token_id(&self) -> Option<String> {
        self.snapshot()
            .tokens()
            .iter()
            .find(|t| t.is_software())
            .map(|t| t.id().to_string())
    }

    pub fn find_key_info(&self, key_id: &str) -> SignerResult<KeyInfo> {
        trace!(key_id, "find_key_info()");
        let snapshot = self.snapshot();
        let (_, key) = find_key(&snapshot, key_id)?;
        Ok(KeyInfo::from_runtime(key))
    }

    pub fn key_sign_mechanism(&self, key_id: &str) -> SignerResult<SignMechanism> {
        let snapshot = self.snapshot();
        let (_, key) = find_key(&snapshot, key_id)?;
        Ok(key.sign_mechanism())
    }

    /// Available signing keys on active tokens that hold an active
    /// certificate of `member_id`.
    pub fn signing_keys_for_member(&self, member_id: &ClientId) -> Vec<KeyInfo> {
        trace!(member_id = %member_id, "signing_keys_for_member()");
        self.snapshot()
            .tokens()
            .iter()
            .filter(|t| t.is_active())
            .flat_map(RuntimeToken::keys)
            .filter(|k| k.is_available() && k.usage() == Some(KeyUsage::Signing))
            .filter(|k| {
                k.certs().iter().any(|c| {
                    let cert = c.cert();
                    cert.active && cert.member_id.as_ref() == Some(member_id)
                })
            })
            .map(KeyInfo::from_runtime)
            .collect()
    }

    pub fn certificate_info(&self, cert_id: &str) -> Option<CertificateInfo> {
        trace!(cert_id, "certificate_info()");
        self.snapshot()
            .find_cert(cert_id)
            .map(|found| CertificateInfo::from_runtime(&found.cert))
    }

    pub fn certificate_info_for_hash(&self, cert_hash: &str) -> Option<CertificateInfo> {
        trace!(cert_hash, "certificate_info_for_hash()");
        self.snapshot()
            .find_cert_by_hash(cert_hash)
            .map(|found| CertificateInfo::from_runtime(&found.cert))
    }

    pub fn all_certs(&self) -> Vec<CertificateInfo> {
        self.snapshot()
            .tokens()
            .iter()
            .flat_map(RuntimeToken::keys)
            .flat_map(|k| k.certs())
            .map(|c| CertificateInfo::from_runtime(&c))
            .collect()
    }

    /// First request on `key_id` made for `member_id`. On an authentication
    /// key any request matches.
    pub fn cert_request_info_for_member(
        &self,
        key_id: &str,
        member_id: &ClientId,
    ) -> SignerResult<Option<CertRequestInfo>> {
        trace!(key_id, member_id = %member_id, "cert_request_info_for_member()");
        let snapshot = self.snapshot();
        let (_, key) = find_key(&snapshot, key_id)?;
        let is_auth = key.usage() == Some(KeyUsage::Authentication);
        let found = key
            .cert_requests()
            .iter()
            .find(|r| is_auth || r.member_id.as_ref() == Some(member_id))
            .map(CertRequestInfo::from_request);
        Ok(found)
    }

    pub fn cert_request_info(&self, cert_request_id: &str) -> Option<CertRequestInfo> {
        trace!(cert_request_id, "cert_request_info()");
        self.snapshot()
            .find_cert_request(cert_request_id)
            .map(|found| CertRequestInfo::from_request(found.request))
    }

    pub fn key_info_for_cert_hash(&self, cert_hash: &str) -> Option<KeyInfo> {
        self.snapshot()
            .find_cert_by_hash(cert_hash)
            .map(|found| KeyInfo::from_runtime(found.key))
    }

    pub fn key_info_for_cert_id(&self, cert_id: &str) -> Option<KeyInfo> {
        self.snapshot()
            .find_cert(cert_id)
            .map(|found| KeyInfo::from_runtime(found.key))
    }

    pub fn is_token_available(&self, token_id: &str) -> SignerResult<bool> {
        let snapshot = self.snapshot();
        Ok(find_token(&snapshot, token_id)?.is_available())
    }

    pub fn is_token_active(&self, token_id: &str) -> SignerResult<bool> {
        let snapshot = self.snapshot();
        Ok(find_token(&snapshot, token_id)?.is_active())
    }

    pub fn is_key_available(&self, key_id: &str) -> SignerResult<bool> {
        let snapshot = self.snapshot();
        let (_, key) = find_key(&snapshot, key_id)?;
        Ok(key.is_available())
    }

    /// Sealed keystore of a software token key.
    pub fn software_token_keystore(&self, key_id: &str) -> SignerResult<Option<Vec<u8>>> {
        let snapshot = self.snapshot();
        let (_, key) = find_key(&snapshot, key_id)?;
        Ok(key.software_keystore().map(<[u8]>::to_vec))
    }

    pub fn is_batch_signing_enabled(&self, token_id: &str) -> SignerResult<bool> {
        let snapshot = self.snapshot();
        Ok(find_token(&snapshot, token_id)?.is_batch_signing_enabled())
    }

    pub fn token_status(&self, token_id: &str) -> SignerResult<TokenStatus> {
        let snapshot = self.snapshot();
        Ok(find_token(&snapshot, token_id)?.status())
    }
}

pub(crate) fn find_token<'a>(
    snapshot: &'a TokenSnapshot,
    token_id: &str,
) -> SignerResult<&'a RuntimeToken> {
    snapshot
        .token(token_id)
        .ok_or_else(|| SignerError::TokenNotFound(token_id.to_string()))
}

pub(crate) fn find_key<'a>(
    snapshot: &'a TokenSnapshot,
    key_id: &str,
) -> SignerResult<(&'a RuntimeToken, &'a RuntimeKey)> {
    snapshot
        .find_key(key_id)
        .ok_or_else(|| SignerError::KeyNotFound(key_id.to_string()))
}
