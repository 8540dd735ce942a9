use std::collections::BTreeMap;
use std::sync::Arc;

use keyconf_database::DeviceEntity;
use tracing::{info, trace, warn};

use crate::definition::TokenDefinition;
use crate::error::{SignerError, SignerResult};
use crate::info::TokenInfo;
use crate::lookup::find_token;
use crate::managers::storage_id;
use crate::model::TokenStatus;
use crate::registry::TokenRegistry;
use crate::services::TokenWriteService;

pub struct TokenManager {
    registry: Arc<TokenRegistry>,
    tokens: Arc<dyn TokenWriteService>,
}

impl TokenManager {
    pub fn new(registry: Arc<TokenRegistry>, tokens: Arc<dyn TokenWriteService>) -> Self {
        Self { registry, tokens }
    }

    /// Persist a token for `definition` unless one with the same id exists,
    /// then attach the definition to it.
    pub fn create_token(&self, definition: &TokenDefinition) -> SignerResult<TokenInfo> {
        let token_id = definition.id();
        trace!(token_id = %token_id, "create_token()");

        self.registry.write_action(|ctx| {
            if ctx.snapshot().token(&token_id).is_some() {
                return Ok(());
            }

            let device = DeviceEntity {
                device_id: token_id.clone(),
                device_type: definition.module_type().to_string(),
                friendly_name: Some(definition.friendly_name()),
                token_id: definition.serial_number().map(str::to_string),
                slot_id: Some(definition.label()),
                pin_index: definition.slot_index(),
                sign_mechanism: Some(definition.sign_mechanism().as_str().to_string()),
                read_only: definition.read_only(),
                ..Default::default()
            };

            ctx.invalidate_cache();
            let storage_id = self.tokens.save(&device)?;
            info!(token_id = %token_id, storage_id, "Created token");
            Ok(())
        })?;

        let snapshot = self.registry.current_tokens();
        let token = find_token(&snapshot, &token_id)?;
        token.set_definition(Some(definition.clone()));
        Ok(TokenInfo::from_runtime(token))
    }

    /// Attach `definition` to the token it identifies.
    pub fn enable_token(&self, definition: &TokenDefinition) -> SignerResult<()> {
        let token_id = definition.id();
        trace!(token_id = %token_id, "enable_token()");
        let snapshot = self.registry.current_tokens();
        find_token(&snapshot, &token_id)?.set_definition(Some(definition.clone()));
        Ok(())
    }

    pub fn set_token_available(&self, token_id: &str, available: bool) -> SignerResult<()> {
        trace!(token_id, available, "set_token_available()");
        let snapshot = self.registry.current_tokens();
        find_token(&snapshot, token_id)?.set_available(available);
        Ok(())
    }

    pub fn set_token_available_for_definition(
        &self,
        definition: &TokenDefinition,
        available: bool,
    ) -> SignerResult<()> {
        self.set_token_available(&definition.id(), available)
    }

    pub fn set_token_active(&self, token_id: &str, active: bool) -> SignerResult<()> {
        trace!(token_id, active, "set_token_active()");
        let snapshot = self.registry.current_tokens();
        find_token(&snapshot, token_id)?.set_active(active);
        Ok(())
    }

    pub fn set_token_status(&self, token_id: &str, status: TokenStatus) -> SignerResult<()> {
        trace!(token_id, ?status, "set_token_status()");
        let snapshot = self.registry.current_tokens();
        find_token(&snapshot, token_id)?.set_status(status);
        Ok(())
    }

    pub fn set_token_info(&self, token_id: &str, info: BTreeMap<String, String>) -> SignerResult<()> {
        trace!(token_id, "set_token_info()");
        let snapshot = self.registry.current_tokens();
        find_token(&snapshot, token_id)?.set_info(info);
        Ok(())
    }

    pub fn set_token_friendly_name(&self, token_id: &str, friendly_name: &str) -> SignerResult<()> {
        trace!(token_id, friendly_name, "set_token_friendly_name()");
        self.registry.write_action(|ctx| {
            let token = find_token(ctx.snapshot(), token_id)?;
            let id = storage_id("Token", token_id, token.internal_id())?;

            ctx.invalidate_cache();
            if !self.tokens.update_friendly_name(id, friendly_name)? {
                return Err(token_vanished(token_id));
            }
            info!(token_id, "Updated token friendly name");
            Ok(())
        })
    }
}

/// The token row disappeared between resolving the token and writing to it.
pub(crate) fn token_vanished(token_id: &str) -> SignerError {
    warn!(token_id, "Token vanished from the key configuration");
    SignerError::TokenNotFound(token_id.to_string())
}
