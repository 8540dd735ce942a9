//! Software token PIN hashing and PIN policy.

use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{SignerError, SignerResult};

/// Length of a PIN hash in bytes.
pub const PIN_HASH_LEN: usize = 32;

const PIN_HASH_SALT: &[u8] = b"xroad-signer-software-token-pin";
const PIN_HASH_INFO: &[u8] = b"signer-pin-hash-v1";

/// Hashes software token PINs.
///
/// Stateless and deterministic: the same PIN always gives the same hash, so
/// a stored hash can be compared against a candidate.
///
/// The hash is a single HKDF-SHA256 pass under a fixed salt. It is fast to
/// compute, so a leaked hash of a short PIN can be brute forced offline;
/// the key configuration database must be protected accordingly.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwarePinHasher;

impl SoftwarePinHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn hash_pin(&self, pin: &str) -> SignerResult<Vec<u8>> {
        let hkdf = Hkdf::<Sha256>::new(Some(PIN_HASH_SALT), pin.as_bytes());
        let mut okm = [0u8; PIN_HASH_LEN];
        hkdf.expand(PIN_HASH_INFO, &mut okm)
            .map_err(|e| SignerError::Internal(format!("PIN hash expand failed: {:?}", e)))?;
        Ok(okm.to_vec())
    }

    /// Compare `pin` against `expected` in constant time.
    pub fn verify(&self, pin: &str, expected: &[u8]) -> SignerResult<bool> {
        let actual = self.hash_pin(pin)?;
        Ok(actual.as_slice().ct_eq(expected).into())
    }
}

/// Complexity rules for software token PINs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolicy {
    pub min_length: usize,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self { min_length: 10 }
    }
}

impl PinPolicy {
    /// Require the minimum length and at least one upper case letter, lower
    /// case letter, digit and special character. Only printable ASCII is
    /// accepted.
    pub fn validate(&self, pin: &str) -> SignerResult<()> {
        if pin.chars().count() < self.min_length {
            return Err(SignerError::PinPolicy(format!(
                "PIN must be at least {} characters",
                self.min_length
            )));
        }
        if !pin.chars().all(|c| c.is_ascii_graphic()) {
            return Err(SignerError::PinPolicy(
                "PIN contains characters outside printable ASCII".to_string(),
            ));
        }

        let has_upper = pin.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = pin.chars().any(|c| c.is_ascii_lowercase());
        let has_digit = pin.chars().any(|c| c.is_ascii_digit());
        let has_special = pin.chars().any(|c| c.is_ascii_punctuation());
        if !(has_upper && has_lower && has_digit && has_special) {
            return Err(SignerError::PinPolicy(
                "PIN must mix upper and lower case letters, digits and special characters"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = SoftwarePinHasher::new();
        let hash = hasher.hash_pin("1234").unwrap();
        assert_eq!(hash, hasher.hash_pin("1234").unwrap());
        assert_ne!(hash, hasher.hash_pin("1235").unwrap());
        assert_eq!(hash.len(), PIN_HASH_LEN);
    }

    #[test]
    fn test_verify() {
        let hasher = SoftwarePinHasher::new();
        let hash = hasher.hash_pin("secret").unwrap();
        assert!(hasher.verify("secret", &hash).unwrap());
        assert!(!hasher.verify("Secret", &hash).unwrap());
        assert!(!hasher.verify("secret", &hash[..16]).unwrap());
    }

    #[test]
    fn test_policy() {
        let policy = PinPolicy::default();
        assert!(policy.validate("Abcdefgh1!").is_ok());
        assert!(policy.validate("Abcdef1!").is_err());
        assert!(policy.validate("abcdefgh1!").is_err());
        assert!(policy.validate("Abcdefgh1 !").is_err());
        assert!(matches!(
            policy.validate("short"),
            Err(SignerError::PinPolicy(_))
        ));
    }
}
