//! Quillwire Cryptographic Primitives
//!
//! Cryptographic building blocks for Quillwire sessions. Pure functions over
//! key material. Callers provide random bytes (key generation entropy, AEAD
//! nonces, padding filler) so every operation is reproducible in tests.
//!
//! # Key Lifecycle
//!
//! Each peer session starts from a static P-256 Diffie-Hellman agreement
//! between the local identity and the pinned peer identity. The shared secret
//! is expanded into two directional chain keys, and every message steps one
//! chain forward to produce a one-time message key.
//!
//! ```text
//! ECDH(identity, peer identity)
//!        │
//!        ▼
//! HKDF "ROOT" → 64 bytes → send chain ‖ receive chain (split by role)
//!        │
//!        ▼
//! HKDF "MSG_KEY" per message → message key ‖ next chain key
//!        │
//!        ▼
//! Pad to bucket → AES-256-GCM → ciphertext
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Stepping a chain consumes it: the old chain key is zeroized on drop
//! - Message keys are zeroized immediately after their single use
//!
//! Authenticity:
//! - AES-256-GCM with a fresh random 96-bit nonce per message
//! - Any tag mismatch surfaces as one generic decryption failure
//!
//! Traffic Analysis:
//! - Plaintexts are padded to a fixed bucket before encryption

#![forbid(unsafe_code)]

pub mod aead;
pub mod chain;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod padding;

pub use aead::{NONCE_SIZE, TAG_SIZE, aead_decrypt, aead_encrypt};
pub use chain::{ChainKey, MessageKey};
pub use error::CryptoError;
pub use kdf::{KEY_MATERIAL_SIZE, MESSAGE_KEY_LABEL, ROOT_LABEL, hkdf};
pub use keys::{KeyPair, PrivateKey, PublicKey, SharedSecret, derive_shared_secret};
pub use padding::{DEFAULT_BUCKET_SIZE, LENGTH_PREFIX_SIZE, pad, unpad};
