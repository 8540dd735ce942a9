//! PIN-protected software keystores.
//!
//! Layout of a sealed keystore: `[salt: 16][nonce: 12][ciphertext + tag]`.
//! The cipher key is derived from the token PIN and the per-keystore salt,
//! so a keystore only opens under the PIN it was sealed with.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{SignerError, SignerResult};

pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const KEY_INFO: &[u8] = b"signer-keystore-v1";

/// Encrypt `plaintext` under `pin`.
pub fn seal(pin: &str, plaintext: &[u8]) -> SignerResult<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = cipher(pin, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| SignerError::Keystore(e.to_string()))?;

    let mut sealed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a keystore sealed with [`seal`]. Fails with
/// [`SignerError::PinIncorrect`] when `pin` is not the sealing PIN.
pub fn open(pin: &str, sealed: &[u8]) -> SignerResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < SALT_SIZE + NONCE_SIZE {
        return Err(SignerError::Keystore(format!(
            "Sealed keystore too short: {} bytes",
            sealed.len()
        )));
    }
    let (salt, rest) = sealed.split_at(SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let cipher = cipher(pin, salt)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SignerError::PinIncorrect)
}

/// Open under `old_pin` and seal again under `new_pin`.
pub fn reseal(old_pin: &str, new_pin: &str, sealed: &[u8]) -> SignerResult<Vec<u8>> {
    let plaintext = open(old_pin, sealed)?;
    seal(new_pin, &plaintext)
}

fn cipher(pin: &str, salt: &[u8]) -> SignerResult<ChaCha20Poly1305> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), pin.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(KEY_INFO, &mut key[..])
        .map_err(|e| SignerError::Keystore(format!("HKDF expand failed: {:?}", e)))?;
    ChaCha20Poly1305::new_from_slice(&key[..]).map_err(|e| SignerError::Keystore(e.to_string()))
}
