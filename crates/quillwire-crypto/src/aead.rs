//! Message encryption using AES-256-GCM
//!
//! All functions are pure - the nonce must be provided by the caller, who is
//! responsible for drawing it from a cryptographically secure source.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{chain::MessageKey, error::CryptoError};

/// AES-GCM nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under a one-time message key.
///
/// Returns the ciphertext with the 16-byte tag appended.
pub fn aead_encrypt(key: &MessageKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.key()));

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(nonce), plaintext) else {
        unreachable!("AES-256-GCM encryption cannot fail below the 64 GiB plaintext limit");
    };

    ciphertext
}

/// Decrypt and authenticate `ciphertext`.
///
/// # Errors
///
/// - `DecryptionFailed`: wrong key, wrong nonce, tampered or truncated
///   ciphertext. The cause is never distinguished.
pub fn aead_decrypt(
    key: &MessageKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.key()));

    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}
