//! Chain keys and message keys for the symmetric ratchet
//!
//! # Security Properties
//!
//! - Forward Secrecy: a chain key is replaced by its successor on every step
//!   and wiped when dropped
//! - Key Uniqueness: each step produces a fresh message key
//! - Determinism: the same chain key always yields the same step output

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::{KEY_MATERIAL_SIZE, MESSAGE_KEY_LABEL, hkdf};

/// Size of chain keys and message keys in bytes
pub const KEY_SIZE: usize = 32;

/// A one-time message key for a single AEAD operation.
///
/// Not `Clone`: a message key exists in exactly one place and is wiped when
/// that owner drops it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; KEY_SIZE]);

impl MessageKey {
    /// 32-byte AES-256-GCM key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey([REDACTED])")
    }
}

/// A directional chain key.
///
/// [`step()`](Self::step) derives the message key for the current position
/// together with the successor chain key. Callers replace their stored chain
/// key with the successor; dropping the old value zeroizes it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey([u8; KEY_SIZE]);

impl ChainKey {
    /// Wrap raw chain key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Split 64 bytes of root material into `(first half, second half)`.
    pub fn split(material: &[u8; KEY_MATERIAL_SIZE]) -> (Self, Self) {
        let mut first = Self([0u8; KEY_SIZE]);
        let mut second = Self([0u8; KEY_SIZE]);
        first.0.copy_from_slice(&material[..KEY_SIZE]);
        second.0.copy_from_slice(&material[KEY_SIZE..]);
        (first, second)
    }

    /// Raw chain key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Step the chain once.
    ///
    /// Returns `(message key, next chain key)` from
    /// `HKDF(chain key, zero salt, "MSG_KEY")`. The 64-byte intermediate
    /// buffer is zeroized before returning.
    pub fn step(&self) -> (MessageKey, Self) {
        let material = hkdf(&self.0, None, MESSAGE_KEY_LABEL);

        let mut message_key = MessageKey([0u8; KEY_SIZE]);
        let mut next = Self([0u8; KEY_SIZE]);
        message_key.0.copy_from_slice(&material[..KEY_SIZE]);
        next.0.copy_from_slice(&material[KEY_SIZE..]);

        (message_key, next)
    }
}

impl fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChainKey([REDACTED])")
    }
}
