//! Scenario tests for the signer registry.
//!
//! Test organization follows the registry rules:
//!
//! - `merge.rs`       - Rules 1-12 (Merge, refresh and OCSP announcements)
//! - `token_conf.rs`  - Rules 13-20 (Store gateway, hash and save)
//! - `managers.rs`    - Rules 21-38 (Token, key and certificate mutations)
//! - `pin.rs`         - Rules 41-49 (PIN lifecycle and keystores)
//! - `lookup.rs`      - Rules 51-60 (Read API)
//! - `concurrency.rs` - Rules 61-66 (Snapshot publication under load)
//!
//! Mock-backed tests share one row set between the bulk store mock and the
//! write service mocks, so a write is visible to the reload that follows.
//! SQLite-backed tests run the whole stack over a temporary database.

mod pin;

use std::sync::Arc;

use keyconf_database::{
    CertEntity, CertRequestEntity, DatabasePool, DeviceEntity, KeyEntity, PoolConfig,
};
use parking_lot::Mutex;
use signer_config::Config;

use crate::context::SignerContext;
use crate::listener::RecordingMergeListener;
use crate::loader::TokenRegistryLoader;
use crate::ocsp::{NullOcspCache, OcspCache};
use crate::registry::TokenRegistry;
use crate::services::MockKeyConfStore;
use crate::store::SqliteKeyConf;
use crate::token_conf::TokenConf;

/// Device rows standing in for the database.
#[derive(Clone, Default)]
pub(crate) struct Rows(Arc<Mutex<Vec<DeviceEntity>>>);

impl Rows {
    pub(crate) fn new(devices: Vec<DeviceEntity>) -> Self {
        Self(Arc::new(Mutex::new(devices)))
    }

    pub(crate) fn get(&self) -> Vec<DeviceEntity> {
        self.0.lock().clone()
    }

    pub(crate) fn set(&self, devices: Vec<DeviceEntity>) {
        *self.0.lock() = devices;
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut Vec<DeviceEntity>)) {
        f(&mut self.0.lock());
    }
}

/// Bulk store mock answering from `rows`.
pub(crate) fn bulk_store(rows: &Rows) -> MockKeyConfStore {
    let mut store = MockKeyConfStore::new();
    let source = rows.clone();
    store.expect_find_all().returning(move || Ok(source.get()));
    let source = rows.clone();
    store
        .expect_find_all_ids()
        .returning(move || Ok(source.get().iter().filter_map(|d| d.id).collect()));
    store
}

/// Initialized registry over `store`.
pub(crate) fn registry(store: MockKeyConfStore, ocsp: Arc<dyn OcspCache>) -> Arc<TokenRegistry> {
    let conf = Arc::new(TokenConf::new(Arc::new(store)));
    let registry = Arc::new(TokenRegistry::new(TokenRegistryLoader::new(conf, ocsp)));
    registry.init().unwrap();
    registry
}

pub(crate) fn registry_over(rows: &Rows) -> Arc<TokenRegistry> {
    registry(bulk_store(rows), Arc::new(NullOcspCache))
}

pub(crate) fn soft_device(keys: Vec<KeyEntity>) -> DeviceEntity {
    DeviceEntity {
        id: Some(1),
        device_id: "0".to_string(),
        device_type: "softToken".to_string(),
        friendly_name: Some("softToken-0".to_string()),
        slot_id: Some("softToken-0".to_string()),
        sign_mechanism: Some("CKM_RSA_PKCS".to_string()),
        keys,
        ..Default::default()
    }
}

pub(crate) fn key_entity(row: i64, key_id: &str) -> KeyEntity {
    KeyEntity {
        id: Some(row),
        key_id: key_id.to_string(),
        ..Default::default()
    }
}

/// Certificate whose DER bytes are its id, so distinct ids hash apart.
pub(crate) fn cert_entity(row: i64, cert_id: &str) -> CertEntity {
    CertEntity {
        id: Some(row),
        cert_id: cert_id.to_string(),
        contents: cert_id.as_bytes().to_vec(),
        ..Default::default()
    }
}

pub(crate) fn request_entity(row: i64, request_id: &str, member: &str, subject: &str) -> CertRequestEntity {
    CertRequestEntity {
        id: Some(row),
        cert_request_id: request_id.to_string(),
        member_id: Some(member.to_string()),
        subject_name: subject.to_string(),
        ..Default::default()
    }
}

/// Whole stack over a temporary SQLite database, registry initialized.
pub(crate) fn sqlite_context(config: &Config) -> (tempfile::TempDir, SignerContext) {
    let dir = tempfile::tempdir().unwrap();
    let pool = DatabasePool::open(&dir.path().join("keyconf.sqlite"), PoolConfig::default())
        .unwrap();
    let context = SignerContext::with_store(
        SqliteKeyConf::new(Arc::new(pool)),
        config,
        Arc::new(NullOcspCache),
    );
    context.registry.init().unwrap();
    (dir, context)
}

/// Basic workflow: software token, key and certificate created through the
/// managers and read back through the lookup API.
#[test]
fn basic_workflow() {
    use crate::definition::TokenDefinition;
    use crate::managers::{NewCert, NewKey};
    use crate::model::SignMechanism;

    let (_dir, ctx) = sqlite_context(&Config::default());

    let token = ctx
        .tokens
        .create_token(&TokenDefinition::software(SignMechanism::RsaPkcs))
        .unwrap();
    assert_eq!(token.id, "0");

    ctx.keys
        .add_key(
            "0",
            NewKey {
                id: "k1".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    ctx.certs
        .add_cert(
            "k1",
            NewCert {
                id: "c1".to_string(),
                active: true,
                certificate: vec![1, 2, 3],
                ..Default::default()
            },
        )
        .unwrap();

    let info = ctx.lookup.find_token_and_key("k1").unwrap();
    assert_eq!(info.token.id, "0");
    assert_eq!(info.key.certs.len(), 1);
    assert!(info.key.certs[0].active);

    // Nothing changed outside the registry, so a merge finds nothing.
    let listener = RecordingMergeListener::new();
    assert_eq!(
        ctx.registry.merge(&listener).unwrap(),
        crate::registry::MergeOutcome::Unchanged
    );
    assert!(listener.is_empty());
}
