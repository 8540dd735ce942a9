//! Construction of the registry and its services from [`Config`].

use std::sync::Arc;
use std::time::Duration;

use keyconf_database::{DatabasePool, PoolConfig};
use signer_config::{Config, Paths};
use tracing::info;

use crate::error::{SignerError, SignerResult, StoreError};
use crate::listener::MergeListener;
use crate::loader::TokenRegistryLoader;
use crate::lookup::TokenLookup;
use crate::managers::{CertManager, KeyManager, TokenManager, TokenPinManager};
use crate::ocsp::OcspCache;
use crate::pin::PinPolicy;
use crate::registry::TokenRegistry;
use crate::store::SqliteKeyConf;
use crate::token_conf::TokenConf;
use crate::worker::MergeWorker;

/// Every signer registry service, sharing one registry and one store.
pub struct SignerContext {
    pub registry: Arc<TokenRegistry>,
    pub lookup: TokenLookup,
    pub tokens: TokenManager,
    pub keys: KeyManager,
    pub certs: CertManager,
    pub pins: TokenPinManager,
    store: SqliteKeyConf,
    merge_interval: Duration,
}

impl SignerContext {
    /// Open the key configuration database and load the registry from it.
    pub fn open(config: &Config, paths: &Paths, ocsp: Arc<dyn OcspCache>) -> SignerResult<Self> {
        let db_path = config.database_file(paths);
        let pool = DatabasePool::open(
            &db_path,
            PoolConfig {
                max_size: config.pool_max_size,
                ..Default::default()
            },
        )
        .map_err(StoreError::from)?;
        info!(path = %db_path.display(), "Opened key configuration database");

        let context = Self::with_store(SqliteKeyConf::new(Arc::new(pool)), config, ocsp);
        context.registry.init()?;
        Ok(context)
    }

    /// Wire services over `store` without loading the registry.
    pub fn with_store(
        store: SqliteKeyConf,
        config: &Config,
        ocsp: Arc<dyn OcspCache>,
    ) -> Self {
        let shared = Arc::new(store.clone());
        let conf = Arc::new(TokenConf::new(shared.clone()));
        let registry = Arc::new(TokenRegistry::new(TokenRegistryLoader::new(conf, ocsp)));

        let mut pins = TokenPinManager::new(Arc::clone(&registry), shared.clone());
        if config.enforce_token_pin_policy {
            pins = pins.with_policy(PinPolicy::default());
        }

        Self {
            lookup: TokenLookup::new(Arc::clone(&registry)),
            tokens: TokenManager::new(Arc::clone(&registry), shared.clone()),
            keys: KeyManager::new(Arc::clone(&registry), shared.clone()),
            certs: CertManager::new(
                Arc::clone(&registry),
                shared.clone(),
                shared.clone(),
                shared,
            ),
            pins,
            registry,
            store,
            merge_interval: Duration::from_secs(config.merge_interval_secs.max(1)),
        }
    }

    pub fn store(&self) -> &SqliteKeyConf {
        &self.store
    }

    /// Start merging external store changes every `merge_interval_secs`.
    pub fn start_merge_worker(&self, listener: Arc<dyn MergeListener>) -> SignerResult<MergeWorker> {
        MergeWorker::spawn(Arc::clone(&self.registry), listener, self.merge_interval)
            .map_err(|e| SignerError::Internal(format!("Failed to start merge worker: {}", e)))
    }
}
