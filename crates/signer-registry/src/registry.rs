//! The process-wide token registry.
//!
//! # Write Path (strict order)
//!
//! 1. Take the write lock
//! 2. Resolve the target in the current snapshot
//! 3. Write through to the store
//! 4. Reload and merge, publish the merged snapshot
//!
//! If step 2 or 3 fails before the context was invalidated, nothing is
//! reloaded. Readers never take the write lock; they clone the current
//! snapshot pointer and keep a consistent view for as long as they hold it.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use crate::error::{SignerResult, TokenConfError};
use crate::listener::MergeListener;
use crate::loader::TokenRegistryLoader;
use crate::snapshot::TokenSnapshot;

/// What a call to [`TokenRegistry::merge`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The store content still matched the current snapshot.
    Unchanged,
    /// A new snapshot was published.
    Merged { added_certs: usize },
}

/// Handed to write actions. Holds the snapshot the action resolved its
/// target in and records whether the registry must be refreshed afterwards.
pub struct WriteContext {
    snapshot: Arc<TokenSnapshot>,
    invalidated: Cell<bool>,
}

impl WriteContext {
    pub fn snapshot(&self) -> &TokenSnapshot {
        &self.snapshot
    }

    /// Request a reload once the action returns, whatever its outcome.
    pub fn invalidate_cache(&self) {
        self.invalidated.set(true);
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.get()
    }
}

pub struct TokenRegistry {
    loader: TokenRegistryLoader,
    current: RwLock<Arc<TokenSnapshot>>,
    /// Serializes snapshot replacement.
    write_lock: Mutex<()>,
}

impl TokenRegistry {
    /// Registry holding an empty snapshot until [`TokenRegistry::init`].
    pub fn new(loader: TokenRegistryLoader) -> Self {
        Self {
            loader,
            current: RwLock::new(Arc::new(TokenSnapshot::empty())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn loader(&self) -> &TokenRegistryLoader {
        &self.loader
    }

    /// Load every token and install the result as the current snapshot.
    pub fn init(&self) -> Result<(), TokenConfError> {
        let _guard = self.write_lock.lock();
        let snapshot = self.loader.load_tokens()?;
        info!(tokens = snapshot.len(), "Token registry initialized");
        self.publish(snapshot);
        Ok(())
    }

    /// The published snapshot.
    pub fn current_tokens(&self) -> Arc<TokenSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Absorb store changes made outside this registry.
    ///
    /// `listener` runs after the new snapshot is published and the write
    /// lock is released. It is not called when nothing changed.
    pub fn merge(&self, listener: &dyn MergeListener) -> Result<MergeOutcome, TokenConfError> {
        let added = {
            let _guard = self.write_lock.lock();
            let current = self.current_tokens();
            match self.loader.merge_tokens(&current)? {
                None => return Ok(MergeOutcome::Unchanged),
                Some(result) => {
                    self.publish(result.snapshot);
                    result.added_certs
                }
            }
        };

        info!(added_certs = added.len(), "Merged key configuration changes");
        listener.merge_done(&added);
        Ok(MergeOutcome::Merged {
            added_certs: added.len(),
        })
    }

    /// Reload and merge unconditionally.
    pub fn refresh(&self) -> Result<(), TokenConfError> {
        let _guard = self.write_lock.lock();
        self.refresh_locked()
    }

    /// Run `action` under the write lock and refresh afterwards if it called
    /// [`WriteContext::invalidate_cache`].
    ///
    /// A failed refresh keeps the previous snapshot and does not change the
    /// action's result; the write itself already happened.
    pub fn write_action<T, F>(&self, action: F) -> SignerResult<T>
    where
        F: FnOnce(&WriteContext) -> SignerResult<T>,
    {
        let _guard = self.write_lock.lock();
        let ctx = WriteContext {
            snapshot: self.current_tokens(),
            invalidated: Cell::new(false),
        };

        let result = action(&ctx);

        if ctx.is_invalidated() {
            if let Err(e) = self.refresh_locked() {
                error!(error = %e, "Failed to refresh token registry after write, keeping previous snapshot");
            }
        }
        result
    }

    /// Cheap check for devices added or removed outside this registry.
    pub fn has_changed(&self) -> bool {
        let known = self.current_tokens().token_internal_ids();
        self.loader.conf().has_changed(&known)
    }

    /// Write the current snapshot back to the store if it diverged from the
    /// content it was loaded from.
    pub fn save_to_conf(&self) -> Result<bool, TokenConfError> {
        let _guard = self.write_lock.lock();
        let loaded = self.current_tokens().to_loaded_tokens();
        let saved = self.loader.conf().save(&loaded)?;
        if saved {
            self.refresh_locked()?;
        }
        Ok(saved)
    }

    fn refresh_locked(&self) -> Result<(), TokenConfError> {
        let current = self.current_tokens();
        let result = self.loader.refresh_tokens(&current)?;
        debug!(added_certs = result.added_certs.len(), "Token registry refreshed");
        self.publish(result.snapshot);
        Ok(())
    }

    fn publish(&self, snapshot: TokenSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }
}
