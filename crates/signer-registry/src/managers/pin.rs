use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, trace};

use crate::error::{SignerError, SignerResult};
use crate::keystore;
use crate::lookup::find_token;
use crate::managers::storage_id;
use crate::managers::token::token_vanished;
use crate::model::TokenStatus;
use crate::pin::{PinPolicy, SoftwarePinHasher};
use crate::registry::TokenRegistry;
use crate::services::TokenWriteService;

/// Software token PIN lifecycle. PINs are never logged.
pub struct TokenPinManager {
    registry: Arc<TokenRegistry>,
    tokens: Arc<dyn TokenWriteService>,
    hasher: SoftwarePinHasher,
    /// Enforced on initialization and PIN change when set.
    policy: Option<PinPolicy>,
}

impl TokenPinManager {
    pub fn new(registry: Arc<TokenRegistry>, tokens: Arc<dyn TokenWriteService>) -> Self {
        Self {
            registry,
            tokens,
            hasher: SoftwarePinHasher::new(),
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: PinPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Check the PIN policy, then set the first PIN of the software token.
    pub fn initialize_software_token(&self, token_id: &str, pin: &str) -> SignerResult<()> {
        trace!(token_id, "initialize_software_token()");
        self.check_policy(pin)?;
        self.set_token_pin(token_id, pin)
    }

    pub fn set_token_pin(&self, token_id: &str, pin: &str) -> SignerResult<()> {
        trace!(token_id, "set_token_pin()");
        let pin_hash = self.hasher.hash_pin(pin)?;

        self.registry.write_action(|ctx| {
            let token = find_token(ctx.snapshot(), token_id)?;
            let id = storage_id("Token", token_id, token.internal_id())?;

            ctx.invalidate_cache();
            if !self.tokens.set_pin(id, &pin_hash)? {
                return Err(token_vanished(token_id));
            }
            info!(token_id, "Token PIN set");
            Ok(())
        })
    }

    /// Re-seal every software keystore of the token under `new_pin` and
    /// store them with the new PIN hash in one write.
    ///
    /// Nothing is written unless the old PIN matches the stored hash and
    /// opens every keystore.
    pub fn update_token_pin(&self, token_id: &str, old_pin: &str, new_pin: &str) -> SignerResult<()> {
        trace!(token_id, "update_token_pin()");

        self.registry.write_action(|ctx| {
            let token = find_token(ctx.snapshot(), token_id)?;
            let id = storage_id("Token", token_id, token.internal_id())?;

            if let Some(stored) = token.pin_hash() {
                if !self.hasher.verify(old_pin, stored)? {
                    error!(token_id, "The PIN provided for updating the PIN was incorrect");
                    token.set_status(TokenStatus::UserPinIncorrect);
                    return Err(SignerError::PinIncorrect);
                }
            }
            self.check_policy(new_pin)?;

            let mut keystores = HashMap::new();
            for key in token.keys() {
                let Some(sealed) = key.software_keystore() else {
                    continue;
                };
                let key_row = storage_id("Key", key.id(), key.internal_id())?;
                let resealed = keystore::reseal(old_pin, new_pin, sealed).map_err(|e| {
                    if matches!(e, SignerError::PinIncorrect) {
                        token.set_status(TokenStatus::UserPinIncorrect);
                    }
                    e
                })?;
                keystores.insert(key_row, resealed);
            }
            let pin_hash = self.hasher.hash_pin(new_pin)?;

            ctx.invalidate_cache();
            if !self.tokens.update_pin(id, &pin_hash, &keystores)? {
                return Err(token_vanished(token_id));
            }
            info!(token_id, keystores = keystores.len(), "Token PIN updated");
            Ok(())
        })
    }

    /// Whether `pin` matches the stored PIN hash. Reads only.
    pub fn verify_token_pin(&self, token_id: &str, pin: &str) -> SignerResult<bool> {
        trace!(token_id, "verify_token_pin()");
        let snapshot = self.registry.current_tokens();
        let token = find_token(&snapshot, token_id)?;
        match token.pin_hash() {
            Some(stored) if !stored.is_empty() => self.hasher.verify(pin, stored),
            _ => Err(SignerError::TokenPinNotSet(token_id.to_string())),
        }
    }

    pub fn token_has_pin(&self, token_id: &str) -> SignerResult<bool> {
        let snapshot = self.registry.current_tokens();
        let token = find_token(&snapshot, token_id)?;
        Ok(token.pin_hash().is_some_and(|h| !h.is_empty()))
    }

    fn check_policy(&self, pin: &str) -> SignerResult<()> {
        match &self.policy {
            Some(policy) => policy.validate(pin),
            None => Ok(()),
        }
    }
}
