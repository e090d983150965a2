//! Error types for cryptographic primitives

use thiserror::Error;

/// Errors from primitive operations.
///
/// Variants never carry key material. `DecryptionFailed` deliberately has no
/// payload so callers cannot learn why authentication failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Public key bytes are not a valid SEC1-encoded P-256 point
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    /// Private key bytes are not a valid P-256 scalar
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// Imported private key does not match the supplied public key
    #[error("private key does not match public key")]
    KeyMismatch,

    /// Entropy source kept producing out-of-range scalars
    #[error("key generation failed after {attempts} attempts")]
    KeyGeneration {
        /// Number of candidate scalars rejected
        attempts: u32,
    },

    /// Authentication tag mismatch, wrong key or malformed ciphertext
    #[error("decryption failed")]
    DecryptionFailed,

    /// Declared padded length is inconsistent with the buffer
    #[error("padding integrity check failed")]
    PaddingIntegrity,

    /// Plaintext does not fit the 4-byte length prefix
    #[error("plaintext too long: {len} bytes")]
    PlaintextTooLong {
        /// Plaintext length in bytes
        len: usize,
    },

    /// Padding bucket size must be non-zero
    #[error("invalid padding bucket size: {0}")]
    InvalidBucketSize(usize),
}

impl CryptoError {
    /// Returns true if the error came from untrusted input that failed an
    /// integrity check.
    ///
    /// Integrity failures must be reported to the peer-facing layer without
    /// distinguishing the sub-cause.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::DecryptionFailed | Self::PaddingIntegrity => true,

            Self::InvalidPublicKey
            | Self::InvalidPrivateKey
            | Self::KeyMismatch
            | Self::KeyGeneration { .. }
            | Self::PlaintextTooLong { .. }
            | Self::InvalidBucketSize(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_failure_is_integrity() {
        assert!(CryptoError::DecryptionFailed.is_integrity_failure());
        assert!(CryptoError::PaddingIntegrity.is_integrity_failure());
    }

    #[test]
    fn key_errors_are_not_integrity() {
        assert!(!CryptoError::InvalidPublicKey.is_integrity_failure());
        assert!(!CryptoError::KeyGeneration { attempts: 8 }.is_integrity_failure());
    }

    #[test]
    fn decryption_failed_display_is_generic() {
        assert_eq!(CryptoError::DecryptionFailed.to_string(), "decryption failed");
    }
}
