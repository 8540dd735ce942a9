use std::sync::Arc;

use keyconf_database::KeyEntity;
use tracing::{info, trace, warn};

use crate::error::{SignerError, SignerResult};
use crate::info::KeyInfo;
use crate::lookup::{find_key, find_token};
use crate::managers::storage_id;
use crate::mapper::decode_public_key;
use crate::model::{KeyUsage, SignMechanism};
use crate::registry::TokenRegistry;
use crate::services::KeyWriteService;

/// A key to be added to a token.
#[derive(Debug, Clone, Default)]
pub struct NewKey {
    pub id: String,
    pub friendly_name: Option<String>,
    pub label: Option<String>,
    /// Base64 encoded public key.
    pub public_key: Option<String>,
    pub sign_mechanism: SignMechanism,
    /// Sealed private key of a software token key.
    pub software_keystore: Option<Vec<u8>>,
}

pub struct KeyManager {
    registry: Arc<TokenRegistry>,
    keys: Arc<dyn KeyWriteService>,
}

impl KeyManager {
    pub fn new(registry: Arc<TokenRegistry>, keys: Arc<dyn KeyWriteService>) -> Self {
        Self { registry, keys }
    }

    pub fn add_key(&self, token_id: &str, key: NewKey) -> SignerResult<KeyInfo> {
        trace!(token_id, key_id = %key.id, "add_key()");

        self.registry.write_action(|ctx| {
            let token = find_token(ctx.snapshot(), token_id)?;
            let token_row = storage_id("Token", token_id, token.internal_id())?;
            let public_key = key
                .public_key
                .as_deref()
                .map(decode_public_key)
                .transpose()?;

            let entity = KeyEntity {
                key_id: key.id.clone(),
                friendly_name: key.friendly_name.clone(),
                label: key.label.clone(),
                public_key,
                sign_mechanism: Some(key.sign_mechanism.as_str().to_string()),
                keystore: key.software_keystore.clone(),
                ..Default::default()
            };

            ctx.invalidate_cache();
            self.keys.save(token_row, &entity)?;
            info!(token_id, key_id = %key.id, "Added key");
            Ok(())
        })?;

        let snapshot = self.registry.current_tokens();
        let (_, added) = find_key(&snapshot, &key.id)?;
        Ok(KeyInfo::from_runtime(added))
    }

    /// Returns `false` if the key does not exist.
    pub fn remove_key(&self, key_id: &str) -> SignerResult<bool> {
        trace!(key_id, "remove_key()");
        self.registry.write_action(|ctx| {
            let Some((_, key)) = ctx.snapshot().find_key(key_id) else {
                warn!(key_id, "Key to remove not found");
                return Ok(false);
            };
            let id = storage_id("Key", key_id, key.internal_id())?;

            ctx.invalidate_cache();
            let deleted = self.keys.delete(id)?;
            info!(key_id, deleted, "Removed key");
            Ok(deleted)
        })
    }

    pub fn set_key_friendly_name(&self, key_id: &str, friendly_name: &str) -> SignerResult<()> {
        trace!(key_id, friendly_name, "set_key_friendly_name()");
        self.update_key(key_id, |keys, id| keys.update_friendly_name(id, friendly_name))
    }

    pub fn set_key_label(&self, key_id: &str, label: &str) -> SignerResult<()> {
        trace!(key_id, label, "set_key_label()");
        self.update_key(key_id, |keys, id| keys.update_label(id, label))
    }

    pub fn set_key_usage(&self, key_id: &str, usage: Option<KeyUsage>) -> SignerResult<()> {
        trace!(key_id, ?usage, "set_key_usage()");
        let usage = usage.map(|u| u.as_str().to_string());
        self.update_key(key_id, |keys, id| keys.update_usage(id, usage))
    }

    /// `public_key` is base64 encoded.
    pub fn set_public_key(&self, key_id: &str, public_key: &str) -> SignerResult<()> {
        trace!(key_id, "set_public_key()");
        let decoded = decode_public_key(public_key)?;
        self.update_key(key_id, |keys, id| keys.update_public_key(id, &decoded))
    }

    /// Runtime only.
    pub fn set_key_available(&self, key_id: &str, available: bool) -> SignerResult<()> {
        trace!(key_id, available, "set_key_available()");
        let snapshot = self.registry.current_tokens();
        let (_, key) = find_key(&snapshot, key_id)?;
        key.set_available(available);
        Ok(())
    }

    fn update_key<F>(&self, key_id: &str, write: F) -> SignerResult<()>
    where
        F: FnOnce(&dyn KeyWriteService, i64) -> crate::error::StoreResult<bool>,
    {
        self.registry.write_action(|ctx| {
            let (_, key) = find_key(ctx.snapshot(), key_id)?;
            let id = storage_id("Key", key_id, key.internal_id())?;

            ctx.invalidate_cache();
            if !write(self.keys.as_ref(), id)? {
                warn!(key_id, "Key vanished from the key configuration");
                return Err(SignerError::KeyNotFound(key_id.to_string()));
            }
            info!(key_id, "Updated key");
            Ok(())
        })
    }
}
