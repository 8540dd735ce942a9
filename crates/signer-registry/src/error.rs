//! Error types for the signer registry.
//!
//! [`SignerError`] is a closed set. Callers that only care about the broad
//! category match on [`SignerError::kind`]; the RPC boundary maps each error
//! to a stable code through [`SignerError::error_code`].

use keyconf_database::DatabaseError;
use thiserror::Error;

use crate::model::KeyUsage;

/// Broad category of a [`SignerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    TransientConflict,
    UsageConflict,
    PinFailure,
    StoreFailure,
    Internal,
}

/// Failure reported by a durable store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Loading, validating or saving the key configuration failed.
///
/// The storage failure is only reachable through
/// [`std::error::Error::source`].
#[derive(Error, Debug)]
#[error("Error while loading or validating key config")]
pub struct TokenConfError {
    #[source]
    source: StoreError,
}

impl TokenConfError {
    pub fn new(source: StoreError) -> Self {
        Self { source }
    }
}

/// Error type of every registry and manager operation.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Token '{0}' not found")]
    TokenNotFound(String),

    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    #[error("Certificate '{0}' not found")]
    CertNotFound(String),

    #[error("Certificate with hash '{0}' not found")]
    CertWithHashNotFound(String),

    #[error("Certificate request '{0}' not found")]
    CertRequestNotFound(String),

    #[error("Operation not allowed for transient cert {0}")]
    TransientCert(String),

    #[error("Cannot add {requested} certificate request to {existing} key")]
    WrongCertUsage {
        requested: KeyUsage,
        existing: KeyUsage,
    },

    #[error("PIN incorrect")]
    PinIncorrect,

    #[error("PIN not set for token '{0}'")]
    TokenPinNotSet(String),

    #[error("PIN does not satisfy the token PIN policy: {0}")]
    PinPolicy(String),

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error(transparent)]
    TokenConf(#[from] TokenConfError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TokenNotFound(_)
            | Self::KeyNotFound(_)
            | Self::CertNotFound(_)
            | Self::CertWithHashNotFound(_)
            | Self::CertRequestNotFound(_) => ErrorKind::NotFound,
            Self::TransientCert(_) => ErrorKind::TransientConflict,
            Self::WrongCertUsage { .. } => ErrorKind::UsageConflict,
            Self::PinIncorrect | Self::TokenPinNotSet(_) | Self::PinPolicy(_) => {
                ErrorKind::PinFailure
            }
            Self::TokenConf(_) | Self::Store(_) => ErrorKind::StoreFailure,
            Self::Keystore(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable code for the RPC and REST boundary.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenNotFound(_) => "Signer.TokenNotFound",
            Self::KeyNotFound(_) => "Signer.KeyNotFound",
            Self::CertNotFound(_) | Self::CertWithHashNotFound(_) => "Signer.CertNotFound",
            Self::CertRequestNotFound(_) => "Signer.CsrNotFound",
            Self::WrongCertUsage { .. } => "Signer.WrongCertUsage",
            Self::PinIncorrect => "Signer.PinIncorrect",
            Self::TokenPinNotSet(_) => "Signer.TokenPinNotSet",
            Self::PinPolicy(_) => "Signer.TokenPinPolicyFailure",
            Self::TokenConf(_) | Self::Store(_) => "Signer.KeyConfError",
            Self::TransientCert(_) | Self::Keystore(_) | Self::Internal(_) => {
                "Signer.InternalError"
            }
        }
    }
}

pub type SignerResult<T> = Result<T, SignerError>;
