//! # Signer Registry
//!
//! The authoritative in-memory model of the signer's tokens, keys,
//! certificates and certificate requests, reconciled against the SQLite key
//! configuration store.
//!
//! ## Principles
//!
//! - **The store is the source of truth for persisted fields** - Managers
//!   write through, then reload and merge. Persisted fields are never patched
//!   in memory.
//! - **Snapshots are published whole** - Readers clone an `Arc` and see
//!   either the pre- or the post-merge graph, never a mix.
//! - **Runtime state survives merges** - Activation, availability, token
//!   definitions, transient certificates and OCSP responses are carried over
//!   by external id.
//! - **Unchanged stores cost one read** - A structural hash of the loaded
//!   entity set short-circuits merges and saves.
//!
//! ## Architecture
//!
//! ```text
//! WRITE:
//!   manager → write_action → store write → reload → merge → publish
//!
//! READ:
//!   current_tokens() → TokenSnapshot → TokenLookup DTOs
//!
//! EXTERNAL CHANGE:
//!   MergeWorker → merge → hash differs → publish → MergeListener
//! ```
//!
//! ## Crate Structure
//!
//! - [`registry`] - Snapshot holder and the write path
//! - [`loader`] - Load, refresh and merge algorithm
//! - [`token_conf`] - Store gateway and structural hash
//! - [`managers`] - Token, key, certificate and PIN mutations
//! - [`lookup`] - Read API returning owned DTOs
//! - [`model`] / [`runtime`] / [`snapshot`] - Domain, runtime and snapshot types
//! - [`store`] - SQLite implementations of the store collaborators
//! - [`worker`] - Background merge thread

mod context;
pub mod definition;
pub mod error;
pub mod info;
pub mod keystore;
pub mod listener;
pub mod loader;
pub mod lookup;
pub mod managers;
mod mapper;
pub mod model;
pub mod ocsp;
pub mod pin;
pub mod registry;
pub mod runtime;
pub mod services;
pub mod snapshot;
pub mod store;
pub mod token_conf;
pub mod worker;

#[cfg(test)]
mod tests;

pub use context::SignerContext;
pub use definition::TokenDefinition;
pub use error::{ErrorKind, SignerError, SignerResult, StoreError, StoreResult, TokenConfError};
pub use listener::{MergeListener, NoopMergeListener, RecordingMergeListener};
pub use loader::{MergeResult, TokenRegistryLoader};
pub use lookup::TokenLookup;
pub use managers::{
    CertManager, KeyManager, NewCert, NewCertRequest, NewKey, TokenManager, TokenPinManager,
};
pub use model::{Cert, CertRequest, ClientId, Key, KeyUsage, SignMechanism, Token, TokenStatus};
pub use ocsp::{NullOcspCache, OcspCache, RecordingOcspCache};
pub use registry::{MergeOutcome, TokenRegistry, WriteContext};
pub use snapshot::TokenSnapshot;
pub use store::SqliteKeyConf;
pub use token_conf::{LoadedTokens, TokenConf};
pub use worker::MergeWorker;
