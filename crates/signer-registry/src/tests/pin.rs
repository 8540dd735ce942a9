//! PIN lifecycle tests.
//!
//! Rules covered:
//! - 41. Setting a PIN stores its hash, never the PIN
//! - 42. Verifying without a stored PIN fails with PIN not set
//! - 43. A PIN update re-seals every keystore in one write
//! - 44. A wrong old PIN fails the update before any write
//! - 45. A keystore sealed under another PIN fails the update before any write
//! - 46. The PIN policy applies only when enforcement is configured
//! - 47. The PIN policy also applies to the new PIN of an update
//! - 48. A PIN update round trips through SQLite
//! - 49. Setting a PIN on a token whose row vanished fails with not found

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use keyconf_database::{DeviceEntity, KeyEntity};
use signer_config::Config;

use super::{key_entity, registry, registry_over, soft_device, sqlite_context, Rows};
use crate::definition::TokenDefinition;
use crate::error::{ErrorKind, SignerError};
use crate::keystore;
use crate::managers::{NewKey, TokenPinManager};
use crate::model::{SignMechanism, TokenStatus};
use crate::ocsp::NullOcspCache;
use crate::pin::{PinPolicy, SoftwarePinHasher, PIN_HASH_LEN};
use crate::services::{KeyConfStore, MockKeyConfStore, MockTokenWriteService};

const OLD_PIN: &str = "Old-Secret-01";
const NEW_PIN: &str = "New-Secret-02";

fn pin_hash(pin: &str) -> Vec<u8> {
    SoftwarePinHasher::new().hash_pin(pin).unwrap()
}

fn keystore_key(row: i64, key_id: &str, pin: &str) -> KeyEntity {
    KeyEntity {
        keystore: Some(keystore::seal(pin, key_id.as_bytes()).unwrap()),
        ..key_entity(row, key_id)
    }
}

/// Software token with a stored hash of `OLD_PIN` and the given keys.
fn protected_token(keys: Vec<KeyEntity>) -> Vec<DeviceEntity> {
    vec![DeviceEntity {
        pin_hash: Some(pin_hash(OLD_PIN)),
        ..soft_device(keys)
    }]
}

/// Rule 41: Setting a PIN stores its hash, never the PIN
#[test]
fn rule_41_set_pin_stores_hash() {
    let rows = Rows::new(vec![soft_device(Vec::new())]);
    let registry = registry_over(&rows);
    let stored = rows.clone();

    let mut tokens = MockTokenWriteService::new();
    tokens
        .expect_set_pin()
        .withf(|id: &i64, hash: &[u8]| *id == 1 && hash.len() == PIN_HASH_LEN)
        .times(1)
        .returning(move |_, hash| {
            let hash = hash.to_vec();
            stored.update(|devices| devices[0].pin_hash = Some(hash));
            Ok(true)
        });
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));

    assert!(!manager.token_has_pin("0").unwrap());
    manager.set_token_pin("0", OLD_PIN).unwrap();

    assert!(manager.token_has_pin("0").unwrap());
    assert!(manager.verify_token_pin("0", OLD_PIN).unwrap());
    assert!(!manager.verify_token_pin("0", NEW_PIN).unwrap());
    let hash = rows.get()[0].pin_hash.clone().unwrap();
    assert_ne!(hash, OLD_PIN.as_bytes());
}

/// Rule 42: Verifying without a stored PIN fails with PIN not set
#[test]
fn rule_42_verify_without_pin() {
    let rows = Rows::new(vec![soft_device(Vec::new())]);
    let registry = registry_over(&rows);
    let manager = TokenPinManager::new(registry, Arc::new(MockTokenWriteService::new()));

    let err = manager.verify_token_pin("0", OLD_PIN).unwrap_err();
    assert!(matches!(err, SignerError::TokenPinNotSet(_)));
    assert_eq!(err.kind(), ErrorKind::PinFailure);
    assert!(matches!(
        manager.verify_token_pin("missing", OLD_PIN),
        Err(SignerError::TokenNotFound(_))
    ));
}

/// Rule 43: A PIN update re-seals every keystore in one write
#[test]
fn rule_43_update_reseals_all_keystores() {
    let rows = Rows::new(protected_token(vec![
        keystore_key(10, "k1", OLD_PIN),
        keystore_key(11, "k2", OLD_PIN),
        key_entity(12, "hw-backed"),
    ]));
    let registry = registry_over(&rows);
    let written = rows.clone();

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_set_pin().never();
    tokens
        .expect_update_pin()
        .withf(|id: &i64, hash: &[u8], keystores: &HashMap<i64, Vec<u8>>| {
            let mut rows: Vec<i64> = keystores.keys().copied().collect();
            rows.sort();
            *id == 1 && hash == pin_hash(NEW_PIN).as_slice() && rows == vec![10, 11]
        })
        .times(1)
        .returning(move |_, hash, keystores| {
            let hash = hash.to_vec();
            let keystores = keystores.clone();
            written.update(|devices| {
                devices[0].pin_hash = Some(hash);
                for key in &mut devices[0].keys {
                    if let Some(sealed) = key.id.and_then(|row| keystores.get(&row)) {
                        key.keystore = Some(sealed.clone());
                    }
                }
            });
            Ok(true)
        });
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));

    manager.update_token_pin("0", OLD_PIN, NEW_PIN).unwrap();

    assert!(manager.verify_token_pin("0", NEW_PIN).unwrap());
    let snapshot = registry.current_tokens();
    for key_id in ["k1", "k2"] {
        let (_, key) = snapshot.find_key(key_id).unwrap();
        let sealed = key.software_keystore().unwrap();
        assert_eq!(keystore::open(NEW_PIN, sealed).unwrap().as_slice(), key_id.as_bytes());
        assert!(keystore::open(OLD_PIN, sealed).is_err());
    }
}

/// Rule 44: A wrong old PIN fails the update before any write
#[test]
fn rule_44_wrong_old_pin_writes_nothing() {
    let rows = Rows::new(protected_token(vec![keystore_key(10, "k1", OLD_PIN)]));
    let registry = registry_over(&rows);

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_update_pin().never();
    tokens.expect_set_pin().never();
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));

    let err = manager
        .update_token_pin("0", "Wrong-Secret-9", NEW_PIN)
        .unwrap_err();

    assert!(matches!(err, SignerError::PinIncorrect));
    assert_eq!(err.error_code(), "Signer.PinIncorrect");
    assert_eq!(rows.get()[0].pin_hash, Some(pin_hash(OLD_PIN)));
    assert_eq!(
        registry.current_tokens().token("0").unwrap().status(),
        TokenStatus::UserPinIncorrect
    );
}

/// Rule 45: A keystore sealed under another PIN fails the update before any write
#[test]
fn rule_45_unopenable_keystore_writes_nothing() {
    // The stored hash matches OLD_PIN but k2 was sealed under another PIN.
    let rows = Rows::new(protected_token(vec![
        keystore_key(10, "k1", OLD_PIN),
        keystore_key(11, "k2", "Other-Secret-3"),
    ]));
    let reads = Arc::new(AtomicUsize::new(0));
    let mut store = MockKeyConfStore::new();
    let source = rows.clone();
    let counter = Arc::clone(&reads);
    store.expect_find_all().returning(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(source.get())
    });
    let registry = registry(store, Arc::new(NullOcspCache));

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_update_pin().never();
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));

    let before = rows.get();
    let err = manager.update_token_pin("0", OLD_PIN, NEW_PIN).unwrap_err();

    assert!(matches!(err, SignerError::PinIncorrect));
    assert_eq!(rows.get(), before);
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

/// Rule 46: The PIN policy applies only when enforcement is configured
#[test]
fn rule_46_policy_only_when_configured() {
    let rows = Rows::new(vec![soft_device(Vec::new())]);
    let registry = registry_over(&rows);

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_set_pin().times(1).returning(|_, _| Ok(true));
    let lenient = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));
    lenient.initialize_software_token("0", "1234").unwrap();

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_set_pin().never();
    let strict = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens))
        .with_policy(PinPolicy::default());
    for weak in ["1234", "alllowercase1!", "NoDigitsHere!", "NoSpecial123"] {
        let err = strict.initialize_software_token("0", weak).unwrap_err();
        assert_eq!(err.error_code(), "Signer.TokenPinPolicyFailure");
    }
}

/// Rule 47: The PIN policy also applies to the new PIN of an update
#[test]
fn rule_47_policy_applies_to_new_pin() {
    let rows = Rows::new(protected_token(vec![keystore_key(10, "k1", OLD_PIN)]));
    let registry = registry_over(&rows);

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_update_pin().never();
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens))
        .with_policy(PinPolicy::default());

    assert!(matches!(
        manager.update_token_pin("0", OLD_PIN, "short"),
        Err(SignerError::PinPolicy(_))
    ));
    assert_eq!(
        registry.current_tokens().token("0").unwrap().status(),
        TokenStatus::Ok
    );
}

/// Rule 48: A PIN update round trips through SQLite
#[test]
fn rule_48_pin_update_round_trip() {
    let config = Config {
        enforce_token_pin_policy: true,
        ..Default::default()
    };
    let (_dir, ctx) = sqlite_context(&config);
    ctx.tokens
        .create_token(&TokenDefinition::software(SignMechanism::RsaPkcs))
        .unwrap();
    ctx.pins.initialize_software_token("0", OLD_PIN).unwrap();
    ctx.keys
        .add_key(
            "0",
            NewKey {
                id: "k1".to_string(),
                software_keystore: Some(keystore::seal(OLD_PIN, b"private key").unwrap()),
                ..Default::default()
            },
        )
        .unwrap();

    // A failed attempt leaves the stored hash and keystore untouched.
    let before = ctx.store().find_all().unwrap();
    assert!(ctx.pins.update_token_pin("0", NEW_PIN, OLD_PIN).is_err());
    assert_eq!(ctx.store().find_all().unwrap(), before);

    ctx.pins.update_token_pin("0", OLD_PIN, NEW_PIN).unwrap();

    assert!(ctx.pins.verify_token_pin("0", NEW_PIN).unwrap());
    assert!(!ctx.pins.verify_token_pin("0", OLD_PIN).unwrap());
    let sealed = ctx.lookup.software_token_keystore("k1").unwrap().unwrap();
    assert_eq!(
        keystore::open(NEW_PIN, &sealed).unwrap().as_slice(),
        b"private key"
    );
}

/// Rule 49: Setting a PIN on a token whose row vanished fails with not found
#[test]
fn rule_49_set_pin_on_vanished_token() {
    let rows = Rows::new(vec![soft_device(Vec::new())]);
    let registry = registry_over(&rows);
    let stored = rows.clone();

    let mut tokens = MockTokenWriteService::new();
    tokens.expect_set_pin().times(1).returning(move |_, _| {
        stored.set(Vec::new());
        Ok(false)
    });
    let manager = TokenPinManager::new(Arc::clone(&registry), Arc::new(tokens));

    assert!(matches!(
        manager.set_token_pin("0", OLD_PIN),
        Err(SignerError::TokenNotFound(id)) if id == "0"
    ));
    assert!(rows.get().is_empty());
}
