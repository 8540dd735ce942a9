//! Immutable snapshot of every token the registry knows about.
//!
//! # Design Principles
//!
//! - A snapshot is built once, indexed once, and never structurally changed
//! - Publishing a snapshot is a single pointer swap in [`crate::TokenRegistry`]
//! - Children are located through index maps (external id or certificate
//!   hash to a position in the tree), never through back-pointers
//! - Runtime-only fields on the wrappers may still change after publication

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::model::Token;
use crate::runtime::{RuntimeCert, RuntimeKey, RuntimeToken};
use crate::token_conf::LoadedTokens;

type KeyPath = (usize, usize);
type ChildPath = (usize, usize, usize);

/// A certificate located in a snapshot together with its owners.
#[derive(Debug, Clone)]
pub struct CertRef<'a> {
    pub token: &'a RuntimeToken,
    pub key: &'a RuntimeKey,
    pub cert: Arc<RuntimeCert>,
}

/// A certificate request located in a snapshot together with its owners.
#[derive(Debug, Clone, Copy)]
pub struct CertRequestRef<'a> {
    pub token: &'a RuntimeToken,
    pub key: &'a RuntimeKey,
    pub request: &'a crate::model::CertRequest,
}

#[derive(Debug, Default)]
pub struct TokenSnapshot {
    tokens: Vec<RuntimeToken>,
    /// Structural hash of the store content this snapshot was built from.
    entity_set_hash: Option<String>,
    tokens_by_id: HashMap<String, usize>,
    keys_by_id: HashMap<String, KeyPath>,
    certs_by_id: HashMap<String, ChildPath>,
    certs_by_hash: HashMap<String, ChildPath>,
    cert_requests_by_id: HashMap<String, ChildPath>,
}

impl TokenSnapshot {
    /// Snapshot with no tokens and no baseline hash.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(tokens: Vec<RuntimeToken>, entity_set_hash: Option<String>) -> Self {
        let mut snapshot = Self {
            tokens,
            entity_set_hash,
            ..Default::default()
        };

        for (t, token) in snapshot.tokens.iter().enumerate() {
            snapshot.tokens_by_id.insert(token.id().to_string(), t);
            for (k, key) in token.keys().iter().enumerate() {
                snapshot.keys_by_id.insert(key.id().to_string(), (t, k));
                for (c, cert) in key.durable_certs().iter().enumerate() {
                    snapshot.certs_by_id.insert(cert.id().to_string(), (t, k, c));
                    snapshot
                        .certs_by_hash
                        .insert(cert.hash().to_string(), (t, k, c));
                }
                for (r, request) in key.cert_requests().iter().enumerate() {
                    snapshot
                        .cert_requests_by_id
                        .insert(request.id.clone(), (t, k, r));
                }
            }
        }

        snapshot
    }

    pub fn tokens(&self) -> &[RuntimeToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn entity_set_hash(&self) -> Option<&str> {
        self.entity_set_hash.as_deref()
    }

    pub fn token(&self, token_id: &str) -> Option<&RuntimeToken> {
        self.tokens_by_id.get(token_id).map(|&t| &self.tokens[t])
    }

    pub fn find_key(&self, key_id: &str) -> Option<(&RuntimeToken, &RuntimeKey)> {
        self.keys_by_id.get(key_id).map(|&(t, k)| {
            let token = &self.tokens[t];
            (token, &token.keys()[k])
        })
    }

    /// Find a certificate by external id, durable first, then transient.
    pub fn find_cert(&self, cert_id: &str) -> Option<CertRef<'_>> {
        if let Some(&path) = self.certs_by_id.get(cert_id) {
            return Some(self.cert_at(path));
        }
        self.find_transient(|c| c.id() == cert_id)
    }

    /// Find a certificate by SHA-1 hash (case-insensitive hex).
    pub fn find_cert_by_hash(&self, hash: &str) -> Option<CertRef<'_>> {
        let hash = hash.to_ascii_lowercase();
        if let Some(&path) = self.certs_by_hash.get(&hash) {
            return Some(self.cert_at(path));
        }
        self.find_transient(|c| c.hash() == hash)
    }

    pub fn find_cert_request(&self, request_id: &str) -> Option<CertRequestRef<'_>> {
        self.cert_requests_by_id
            .get(request_id)
            .map(|&(t, k, r)| {
                let token = &self.tokens[t];
                let key = &token.keys()[k];
                CertRequestRef {
                    token,
                    key,
                    request: &key.cert_requests()[r],
                }
            })
    }

    /// External ids of every certificate, transient ones included.
    pub fn cert_ids(&self) -> HashSet<String> {
        self.all_certs().map(|c| c.id().to_string()).collect()
    }

    /// SHA-1 hashes of every certificate, transient ones included.
    pub fn cert_hashes(&self) -> HashSet<String> {
        self.all_certs().map(|c| c.hash().to_string()).collect()
    }

    /// Storage ids of all persisted tokens.
    pub fn token_internal_ids(&self) -> HashSet<i64> {
        self.tokens.iter().filter_map(RuntimeToken::internal_id).collect()
    }

    /// Rebuild the domain graph, runtime fields included.
    pub fn to_tokens(&self) -> Vec<Token> {
        self.tokens.iter().map(RuntimeToken::to_token).collect()
    }

    /// The domain graph paired with the baseline hash, ready for
    /// [`crate::TokenConf::save`].
    pub fn to_loaded_tokens(&self) -> LoadedTokens {
        LoadedTokens::new(
            self.to_tokens(),
            self.entity_set_hash.clone().unwrap_or_default(),
        )
    }

    fn all_certs(&self) -> impl Iterator<Item = Arc<RuntimeCert>> + '_ {
        self.tokens
            .iter()
            .flat_map(|t| t.keys())
            .flat_map(|k| k.certs())
    }

    fn cert_at(&self, (t, k, c): ChildPath) -> CertRef<'_> {
        let token = &self.tokens[t];
        let key = &token.keys()[k];
        CertRef {
            token,
            key,
            cert: Arc::clone(&key.durable_certs()[c]),
        }
    }

    fn find_transient<P>(&self, predicate: P) -> Option<CertRef<'_>>
    where
        P: Fn(&RuntimeCert) -> bool,
    {
        for token in &self.tokens {
            for key in token.keys() {
                let found = key
                    .transient_certs()
                    .into_iter()
                    .find(|c| predicate(c.as_ref()));
                if let Some(cert) = found {
                    return Some(CertRef { token, key, cert });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cert, CertRequest, Key};

    fn snapshot() -> TokenSnapshot {
        let mut key = Key::new("k1");
        key.certs.push(Cert::new("c1", vec![1]));
        key.cert_requests.push(CertRequest {
            id: "r1".to_string(),
            subject_name: "CN=x".to_string(),
            ..Default::default()
        });
        let mut token = Token::new("softToken", "0");
        token.internal_id = Some(7);
        token.keys.push(key);

        TokenSnapshot::new(vec![RuntimeToken::from_token(token)], Some("h".to_string()))
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = TokenSnapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
        assert!(snapshot.entity_set_hash().is_none());
        assert!(snapshot.token("0").is_none());
    }

    #[test]
    fn test_indexes_resolve_children() {
        let snapshot = snapshot();

        assert_eq!(snapshot.token("0").unwrap().id(), "0");
        let (token, key) = snapshot.find_key("k1").unwrap();
        assert_eq!(token.id(), "0");
        assert_eq!(key.id(), "k1");

        let cert = snapshot.find_cert("c1").unwrap();
        assert_eq!(cert.key.id(), "k1");
        let hash = cert.cert.hash().to_uppercase();
        assert_eq!(snapshot.find_cert_by_hash(&hash).unwrap().cert.id(), "c1");

        let request = snapshot.find_cert_request("r1").unwrap();
        assert_eq!(request.request.subject_name, "CN=x");
        assert_eq!(snapshot.token_internal_ids(), HashSet::from([7]));
    }

    #[test]
    fn test_transient_certs_are_found_by_scan() {
        let snapshot = snapshot();
        let (_, key) = snapshot.find_key("k1").unwrap();
        key.add_transient_cert(Cert::new("t1", vec![2]));

        let found = snapshot.find_cert("t1").unwrap();
        assert!(found.cert.is_transient());
        assert!(snapshot.cert_ids().contains("t1"));
        assert_eq!(snapshot.cert_hashes().len(), 2);
    }
}
