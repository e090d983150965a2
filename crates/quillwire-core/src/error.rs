//! Error types for the ratchet engine.
//!
//! Three classes, matching how callers must react:
//!
//! - Fatal for the call: the session or identity is missing or exhausted. The
//!   caller must (re-)establish before retrying.
//! - Security: the message failed a replay, skip-bound or integrity check.
//!   All of these render as the same text so the error channel is not an
//!   oracle.
//! - Malformed: bad input that involves no key material.

use quillwire_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::PeerId;

/// Why an incoming message was refused.
///
/// Available to in-process callers (audit logging, tests). Never part of the
/// rendered [`EngineError`] text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Counter below the receive watermark and not in the skip cache
    #[error("replayed or stale counter")]
    Replay,

    /// Counter jumps further ahead than the configured maximum skip
    #[error("skip distance exceeds bound")]
    SkipLimit,

    /// Authentication tag, nonce or padding check failed
    #[error("integrity check failed")]
    Integrity,
}

/// Coarse error class for reporting across the command boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Re-establish the session or identity before retrying
    FatalForCall,
    /// Message refused; sub-cause deliberately hidden
    Security,
    /// Bad input shape, safe to log verbosely
    Malformed,
}

/// Errors from engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// No established session for this peer
    #[error("session not found for peer {peer_id}")]
    MissingSession {
        /// Peer that was looked up
        peer_id: PeerId,
    },

    /// Identity key pair has not been generated or imported
    #[error("identity unavailable")]
    MissingIdentity,

    /// Send counter reached its maximum
    #[error("send counter exhausted for peer {peer_id}")]
    CounterExhausted {
        /// Peer whose session must be re-established
        peer_id: PeerId,
    },

    /// Entropy source could not produce a key pair
    #[error("identity key generation failed")]
    KeyGeneration,

    /// Message refused by a security check
    #[error("message rejected")]
    Rejected(Rejection),

    /// Peer public key failed to parse
    #[error("invalid peer public key")]
    InvalidPeerKey,

    /// Persisted identity could not be imported
    #[error("invalid identity record: {0}")]
    InvalidIdentity(CryptoError),

    /// Plaintext does not fit the padding length prefix
    #[error("plaintext too long: {len} bytes")]
    PlaintextTooLong {
        /// Plaintext length in bytes
        len: usize,
    },

    /// Configuration rejected by [`crate::EngineConfig::validate`]
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: &'static str,
    },
}

impl EngineError {
    /// Classify this error for the caller.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingSession { .. }
            | Self::MissingIdentity
            | Self::CounterExhausted { .. }
            | Self::KeyGeneration => ErrorClass::FatalForCall,

            Self::Rejected(_) => ErrorClass::Security,

            Self::InvalidPeerKey
            | Self::InvalidIdentity(_)
            | Self::PlaintextTooLong { .. }
            | Self::InvalidConfig { .. } => ErrorClass::Malformed,
        }
    }

    /// Rejection sub-cause, if this is a security failure.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed | CryptoError::PaddingIntegrity => {
                Self::Rejected(Rejection::Integrity)
            },
            CryptoError::PlaintextTooLong { len } => Self::PlaintextTooLong { len },
            CryptoError::InvalidBucketSize(_) => {
                Self::InvalidConfig { reason: "bucket_size must be non-zero" }
            },
            CryptoError::InvalidPublicKey => Self::InvalidPeerKey,
            CryptoError::KeyGeneration { .. } => Self::KeyGeneration,
            CryptoError::InvalidPrivateKey | CryptoError::KeyMismatch => Self::InvalidIdentity(err),
        }
    }
}
