//! Persisted identity record.
//!
//! The only place private key bytes leave a zeroizing key type. The record
//! itself wipes both buffers on drop.

use quillwire_crypto::{CryptoError, KeyPair};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Serializable identity key pair: SEC1 public key and raw private scalar.
///
/// Serialized as `{"publicKey": [...], "privateKey": [...]}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Uncompressed SEC1 public key (65 bytes)
    pub public_key: Vec<u8>,
    /// Private scalar (32 bytes)
    pub private_key: Vec<u8>,
}

impl IdentityRecord {
    /// Export a key pair.
    pub fn from_key_pair(pair: &KeyPair) -> Self {
        Self {
            public_key: pair.public_key().to_sec1_bytes(),
            private_key: pair.private_key().to_bytes().to_vec(),
        }
    }

    /// Import, validating that both halves are well-formed and match.
    pub fn to_key_pair(&self) -> Result<KeyPair, CryptoError> {
        KeyPair::from_parts(&self.public_key, &self.private_key)
    }
}

impl std::fmt::Debug for IdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRecord")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(seed: u8) -> KeyPair {
        KeyPair::generate(|buffer| buffer.fill(seed)).unwrap()
    }

    #[test]
    fn export_import_preserves_keys() {
        let original = pair(7);
        let record = IdentityRecord::from_key_pair(&original);

        assert_eq!(record.public_key.len(), 65);
        assert_eq!(record.private_key.len(), 32);

        let restored = record.to_key_pair().unwrap();
        assert_eq!(restored.public_key(), original.public_key());
    }

    #[test]
    fn mismatched_halves_rejected() {
        let a = IdentityRecord::from_key_pair(&pair(7));
        let b = IdentityRecord::from_key_pair(&pair(9));
        let mixed =
            IdentityRecord { public_key: a.public_key.clone(), private_key: b.private_key.clone() };

        assert_eq!(mixed.to_key_pair().unwrap_err(), CryptoError::KeyMismatch);
    }

    #[test]
    fn json_uses_camel_case() {
        let record = IdentityRecord::from_key_pair(&pair(7));
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"publicKey\""));
        assert!(json.contains("\"privateKey\""));

        let parsed: IdentityRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn debug_redacts_private_key() {
        let record = IdentityRecord::from_key_pair(&pair(7));
        assert!(format!("{record:?}").contains("REDACTED"));
    }
}
