//! Mutation services over the registry.
//!
//! Every durable operation follows one shape inside
//! [`crate::TokenRegistry::write_action`]: resolve the target in the current
//! snapshot, fail early on not-found or guard violations, invalidate the
//! cache, write through the store collaborator. The registry then reloads
//! and merges, so persisted fields are never patched in memory.
//!
//! Runtime-only setters (availability, activation, status, transient certs,
//! OCSP responses) act on the published wrappers directly and never reload.

mod cert;
mod key;
mod pin;
mod token;

pub use cert::{CertManager, NewCert, NewCertRequest};
pub use key::{KeyManager, NewKey};
pub use pin::TokenPinManager;
pub use token::TokenManager;

use crate::error::{SignerError, SignerResult};

/// Storage id of an entity that must already be persisted.
pub(crate) fn storage_id(kind: &str, external_id: &str, internal_id: Option<i64>) -> SignerResult<i64> {
    internal_id.ok_or_else(|| {
        SignerError::Internal(format!("{} '{}' has not been persisted", kind, external_id))
    })
}
