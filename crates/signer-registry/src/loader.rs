//! Building runtime snapshots from the key configuration.
//!
//! # Merge
//!
//! A merge rebuilds the whole runtime graph from a fresh load. For every
//! loaded token (and key) whose external id is already known, the new
//! wrapper takes over the runtime state of the superseded one, so activation,
//! availability, definitions, info and transient certificates survive. OCSP
//! responses are carried per certificate when both the id and the hash
//! still match. Anything present only in the old snapshot is dropped.

use std::sync::Arc;

use tracing::debug;

use crate::error::TokenConfError;
use crate::model::{Cert, Key, Token};
use crate::ocsp::OcspCache;
use crate::runtime::{RuntimeCert, RuntimeKey, RuntimeToken};
use crate::snapshot::TokenSnapshot;
use crate::token_conf::{LoadedTokens, TokenConf};

/// Outcome of merging a fresh load into a snapshot.
#[derive(Debug)]
pub struct MergeResult {
    pub snapshot: TokenSnapshot,
    /// Certificates whose external id was not in the previous snapshot.
    pub added_certs: Vec<Cert>,
    /// Certificate hashes not seen in the previous snapshot, sorted.
    pub new_cert_hashes: Vec<String>,
}

pub struct TokenRegistryLoader {
    conf: Arc<TokenConf>,
    ocsp: Arc<dyn OcspCache>,
}

impl TokenRegistryLoader {
    pub fn new(conf: Arc<TokenConf>, ocsp: Arc<dyn OcspCache>) -> Self {
        Self { conf, ocsp }
    }

    pub fn conf(&self) -> &Arc<TokenConf> {
        &self.conf
    }

    /// Full load with fresh runtime state. Announces every certificate hash
    /// to the OCSP cache.
    pub fn load_tokens(&self) -> Result<TokenSnapshot, TokenConfError> {
        let loaded = self.conf.retrieve_tokens_from_db()?;
        let hash = loaded.entity_set_hash().to_string();
        let tokens = loaded
            .into_tokens()
            .into_iter()
            .map(RuntimeToken::from_token)
            .collect();
        let snapshot = TokenSnapshot::new(tokens, Some(hash));

        let mut hashes: Vec<String> = snapshot.cert_hashes().into_iter().collect();
        hashes.sort();
        self.announce(&hashes);

        debug!(tokens = snapshot.len(), "Loaded token snapshot");
        Ok(snapshot)
    }

    /// Reload and merge into `current` unconditionally.
    pub fn refresh_tokens(&self, current: &TokenSnapshot) -> Result<MergeResult, TokenConfError> {
        let loaded = self.conf.retrieve_tokens_from_db()?;
        Ok(self.merge_loaded(current, loaded))
    }

    /// Reload and merge into `current` unless the store content still has
    /// the hash `current` was built from.
    pub fn merge_tokens(
        &self,
        current: &TokenSnapshot,
    ) -> Result<Option<MergeResult>, TokenConfError> {
        let loaded = self.conf.retrieve_tokens_from_db()?;
        if current.entity_set_hash() == Some(loaded.entity_set_hash()) {
            debug!("Key configuration hash unchanged, nothing to merge");
            return Ok(None);
        }
        Ok(Some(self.merge_loaded(current, loaded)))
    }

    fn merge_loaded(&self, current: &TokenSnapshot, loaded: LoadedTokens) -> MergeResult {
        let old_ids = current.cert_ids();
        let old_hashes = current.cert_hashes();
        let hash = loaded.entity_set_hash().to_string();

        let tokens = loaded
            .into_tokens()
            .into_iter()
            .map(|token| match current.token(&token.id) {
                Some(previous) => merge_token(previous, token),
                None => RuntimeToken::from_token(token),
            })
            .collect();
        let snapshot = TokenSnapshot::new(tokens, Some(hash));

        let added_certs: Vec<Cert> = snapshot
            .tokens()
            .iter()
            .flat_map(|t| t.keys())
            .flat_map(|k| k.certs())
            .filter(|c| !old_ids.contains(c.id()))
            .map(|c| c.to_cert())
            .collect();

        let mut new_cert_hashes: Vec<String> = snapshot
            .cert_hashes()
            .difference(&old_hashes)
            .cloned()
            .collect();
        new_cert_hashes.sort();
        self.announce(&new_cert_hashes);

        debug!(
            tokens = snapshot.len(),
            added_certs = added_certs.len(),
            new_hashes = new_cert_hashes.len(),
            "Merged token snapshot"
        );

        MergeResult {
            snapshot,
            added_certs,
            new_cert_hashes,
        }
    }

    fn announce(&self, hashes: &[String]) {
        if !hashes.is_empty() {
            self.ocsp.refresh_cache(hashes);
        }
    }
}

fn merge_token(previous: &RuntimeToken, token: Token) -> RuntimeToken {
    RuntimeToken::with_state(token, Arc::clone(previous.state()), |key| {
        match previous.key(&key.id) {
            Some(previous_key) => merge_key(previous_key, key),
            None => RuntimeKey::from_key(key),
        }
    })
}

fn merge_key(previous: &RuntimeKey, key: Key) -> RuntimeKey {
    let merged = RuntimeKey::with_state(key, Arc::clone(previous.state()), |cert| {
        let cert = Arc::new(RuntimeCert::new(cert));
        let carried = previous
            .durable_certs()
            .iter()
            .find(|c| c.id() == cert.id() && c.hash() == cert.hash());
        if let Some(old) = carried {
            cert.set_ocsp_response(old.ocsp_response());
        }
        cert
    });
    merged.prune_transient_certs();
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocsp::RecordingOcspCache;
    use crate::services::MockKeyConfStore;
    use keyconf_database::{CertEntity, DeviceEntity, KeyEntity};
    use parking_lot::Mutex;

    fn cert(id: i64, cert_id: &str) -> CertEntity {
        CertEntity {
            id: Some(id),
            cert_id: cert_id.to_string(),
            contents: cert_id.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    fn device(certs: Vec<CertEntity>) -> DeviceEntity {
        DeviceEntity {
            id: Some(1),
            device_id: "0".to_string(),
            device_type: "softToken".to_string(),
            keys: vec![KeyEntity {
                id: Some(10),
                key_id: "k1".to_string(),
                certs,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Store whose content can be replaced between loads.
    fn loader(
        content: Arc<Mutex<Vec<DeviceEntity>>>,
        ocsp: Arc<RecordingOcspCache>,
    ) -> TokenRegistryLoader {
        let mut store = MockKeyConfStore::new();
        store
            .expect_find_all()
            .returning(move || Ok(content.lock().clone()));
        let conf = Arc::new(TokenConf::new(Arc::new(store)));
        TokenRegistryLoader::new(conf, ocsp)
    }

    #[test]
    fn test_load_announces_all_hashes() {
        let content = Arc::new(Mutex::new(vec![device(vec![cert(1, "c1"), cert(2, "c2")])]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let snapshot = loader(content, Arc::clone(&ocsp)).load_tokens().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(ocsp.calls().len(), 1);
        assert_eq!(ocsp.calls()[0].len(), 2);
    }

    #[test]
    fn test_load_of_empty_store_skips_ocsp() {
        let content = Arc::new(Mutex::new(Vec::new()));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let snapshot = loader(content, Arc::clone(&ocsp)).load_tokens().unwrap();

        assert!(snapshot.is_empty());
        assert!(ocsp.calls().is_empty());
    }

    #[test]
    fn test_merge_tokens_short_circuits_on_equal_hash() {
        let content = Arc::new(Mutex::new(vec![device(vec![cert(1, "c1")])]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let loader = loader(content, Arc::clone(&ocsp));

        let snapshot = loader.load_tokens().unwrap();
        assert!(loader.merge_tokens(&snapshot).unwrap().is_none());
    }

    #[test]
    fn test_merge_reports_added_certs_and_new_hashes() {
        let content = Arc::new(Mutex::new(vec![device(vec![cert(1, "c1")])]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let loader = loader(Arc::clone(&content), Arc::clone(&ocsp));
        let snapshot = loader.load_tokens().unwrap();
        ocsp.clear();

        *content.lock() = vec![device(vec![cert(1, "c1"), cert(2, "c2")])];
        let result = loader.merge_tokens(&snapshot).unwrap().unwrap();

        let added: Vec<&str> = result.added_certs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(added, vec!["c2"]);
        assert_eq!(result.new_cert_hashes.len(), 1);
        assert_eq!(ocsp.calls(), vec![result.new_cert_hashes.clone()]);
    }

    #[test]
    fn test_merge_carries_runtime_state() {
        let content = Arc::new(Mutex::new(vec![device(vec![cert(1, "c1")])]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let loader = loader(Arc::clone(&content), ocsp);
        let snapshot = loader.load_tokens().unwrap();

        let token = snapshot.token("0").unwrap();
        token.set_active(true);
        let key = token.key("k1").unwrap();
        key.set_available(true);
        key.durable_certs()[0].set_ocsp_response(Some(vec![42]));
        key.add_transient_cert(Cert::new("pending", vec![5]));

        content.lock()[0].friendly_name = Some("renamed".to_string());
        let merged = loader.refresh_tokens(&snapshot).unwrap().snapshot;

        let token = merged.token("0").unwrap();
        assert_eq!(token.friendly_name(), Some("renamed"));
        assert!(token.is_active());
        let key = token.key("k1").unwrap();
        assert!(key.is_available());
        assert_eq!(key.durable_certs()[0].ocsp_response(), Some(vec![42]));
        assert_eq!(key.transient_certs().len(), 1);
    }

    #[test]
    fn test_merge_prunes_transient_cert_once_persisted() {
        let content = Arc::new(Mutex::new(vec![device(Vec::new())]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let loader = loader(Arc::clone(&content), ocsp);
        let snapshot = loader.load_tokens().unwrap();

        let (_, key) = snapshot.find_key("k1").unwrap();
        key.add_transient_cert(Cert::new("c1", b"c1".to_vec()));

        *content.lock() = vec![device(vec![cert(1, "c1")])];
        let result = loader.refresh_tokens(&snapshot).unwrap();

        let (_, key) = result.snapshot.find_key("k1").unwrap();
        assert!(key.transient_certs().is_empty());
        assert_eq!(key.durable_certs().len(), 1);
        // Known by id before the merge.
        assert!(result.added_certs.is_empty());
    }

    #[test]
    fn test_merge_drops_ocsp_response_when_hash_changes() {
        let content = Arc::new(Mutex::new(vec![device(vec![cert(1, "c1")])]));
        let ocsp = Arc::new(RecordingOcspCache::new());
        let loader = loader(Arc::clone(&content), ocsp);
        let snapshot = loader.load_tokens().unwrap();
        snapshot.find_cert("c1").unwrap().cert.set_ocsp_response(Some(vec![1]));

        content.lock()[0].keys[0].certs[0].contents = b"reissued".to_vec();
        let merged = loader.refresh_tokens(&snapshot).unwrap().snapshot;

        assert_eq!(merged.find_cert("c1").unwrap().cert.ocsp_response(), None);
    }
}
