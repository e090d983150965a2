//! Encrypted message produced by the engine and consumed on receive.

use quillwire_crypto::{NONCE_SIZE, TAG_SIZE};
use serde::{Deserialize, Serialize};

/// Cleartext header sent alongside every ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Position of this message in the sender's send chain
    pub count: u32,
}

/// An encrypted, padded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Ratchet position
    pub header: MessageHeader,
    /// 12-byte AES-GCM nonce, fresh per message
    pub iv: [u8; NONCE_SIZE],
    /// Padded ciphertext including the 16-byte tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedMessage {
    /// Length of the padded plaintext (ciphertext minus tag).
    pub fn padded_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}
