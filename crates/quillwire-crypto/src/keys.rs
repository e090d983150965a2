//! P-256 key pairs and Diffie-Hellman agreement
//!
//! Key generation takes caller-supplied entropy, mirroring the nonce handling
//! in [`crate::aead`]. Private scalars live inside `p256::SecretKey`, which
//! zeroizes itself on drop; raw exports are wrapped in [`Zeroizing`].

use std::fmt;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Size of a raw P-256 private scalar
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Size of an uncompressed SEC1 P-256 public key
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Out-of-range candidates tolerated before generation gives up. A healthy
/// entropy source fails a single draw with probability below 2^-32.
const MAX_GENERATION_ATTEMPTS: u32 = 8;

/// A P-256 private key.
pub struct PrivateKey(p256::SecretKey);

impl PrivateKey {
    /// Import a raw 32-byte scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(CryptoError::InvalidPrivateKey);
        }
        p256::SecretKey::from_bytes(p256::FieldBytes::from_slice(bytes))
            .map(Self)
            .map_err(|_| CryptoError::InvalidPrivateKey)
    }

    /// Export the raw scalar. Only used for persisting the identity.
    pub fn to_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_SIZE]> {
        let mut field = self.0.to_bytes();
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
        out.copy_from_slice(field.as_slice());
        field.as_mut_slice().zeroize();
        out
    }

    /// Public half of this key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// A P-256 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Parse a SEC1-encoded point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        p256::PublicKey::from_sec1_bytes(bytes).map(Self).map_err(|_| CryptoError::InvalidPublicKey)
    }

    /// Uncompressed SEC1 encoding (65 bytes).
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }
}

/// ECDH output. Zeroized on drop by the underlying `p256` type.
pub struct SharedSecret(p256::ecdh::SharedSecret);

impl SharedSecret {
    /// Raw 32-byte x-coordinate of the shared point.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.raw_secret_bytes().as_slice()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Compute the P-256 Diffie-Hellman shared secret.
///
/// Constant-time with respect to the private scalar (delegated to `p256`).
pub fn derive_shared_secret(private_key: &PrivateKey, peer_public: &PublicKey) -> SharedSecret {
    SharedSecret(p256::ecdh::diffie_hellman(
        private_key.0.to_nonzero_scalar(),
        peer_public.0.as_affine(),
    ))
}

/// A P-256 key pair used for key agreement.
#[derive(Debug)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a key pair from caller-supplied entropy.
    ///
    /// `fill` is asked for 32 bytes per attempt. Candidates outside the
    /// scalar field are discarded and wiped.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration`: the entropy source produced only invalid scalars
    pub fn generate(mut fill: impl FnMut(&mut [u8])) -> Result<Self, CryptoError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let mut candidate = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
            fill(candidate.as_mut_slice());

            if let Ok(private) = PrivateKey::from_bytes(candidate.as_slice()) {
                return Ok(Self::from_private(private));
            }
        }

        Err(CryptoError::KeyGeneration { attempts: MAX_GENERATION_ATTEMPTS })
    }

    /// Build a pair from an existing private key.
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Import a persisted pair, checking that both halves belong together.
    pub fn from_parts(public_bytes: &[u8], private_bytes: &[u8]) -> Result<Self, CryptoError> {
        let public = PublicKey::from_sec1_bytes(public_bytes)?;
        let pair = Self::from_private(PrivateKey::from_bytes(private_bytes)?);

        if pair.public != public {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(pair)
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Private half.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_fill(start: u8) -> impl FnMut(&mut [u8]) {
        let mut next = start;
        move |buffer: &mut [u8]| {
            for byte in buffer.iter_mut() {
                *byte = next;
                next = next.wrapping_add(1);
            }
        }
    }

    #[test]
    fn generation_is_deterministic_for_same_entropy() {
        let a = KeyPair::generate(counter_fill(1)).unwrap();
        let b = KeyPair::generate(counter_fill(1)).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn zero_entropy_is_rejected() {
        let result = KeyPair::generate(|buffer: &mut [u8]| buffer.fill(0));
        assert!(matches!(result, Err(CryptoError::KeyGeneration { .. })));
    }

    #[test]
    fn out_of_range_entropy_is_rejected() {
        let result = KeyPair::generate(|buffer: &mut [u8]| buffer.fill(0xFF));
        assert!(matches!(result, Err(CryptoError::KeyGeneration { .. })));
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let alice = KeyPair::generate(counter_fill(1)).unwrap();
        let bob = KeyPair::generate(counter_fill(100)).unwrap();

        let ab = derive_shared_secret(alice.private_key(), bob.public_key());
        let ba = derive_shared_secret(bob.private_key(), alice.public_key());

        assert_eq!(ab.as_bytes(), ba.as_bytes());
        assert_eq!(ab.as_bytes().len(), 32);
    }

    #[test]
    fn different_peers_give_different_secrets() {
        let alice = KeyPair::generate(counter_fill(1)).unwrap();
        let bob = KeyPair::generate(counter_fill(100)).unwrap();
        let carol = KeyPair::generate(counter_fill(200)).unwrap();

        let ab = derive_shared_secret(alice.private_key(), bob.public_key());
        let ac = derive_shared_secret(alice.private_key(), carol.public_key());

        assert_ne!(ab.as_bytes(), ac.as_bytes());
    }

    #[test]
    fn public_key_sec1_roundtrip() {
        let pair = KeyPair::generate(counter_fill(7)).unwrap();
        let encoded = pair.public_key().to_sec1_bytes();

        assert_eq!(encoded.len(), PUBLIC_KEY_SIZE);
        assert_eq!(encoded[0], 0x04, "uncompressed point tag");
        assert_eq!(&PublicKey::from_sec1_bytes(&encoded).unwrap(), pair.public_key());
    }

    #[test]
    fn invalid_public_key_is_rejected() {
        assert_eq!(PublicKey::from_sec1_bytes(&[0x04; 65]), Err(CryptoError::InvalidPublicKey));
        assert_eq!(PublicKey::from_sec1_bytes(&[]), Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn private_key_length_is_checked() {
        assert!(matches!(PrivateKey::from_bytes(&[1u8; 31]), Err(CryptoError::InvalidPrivateKey)));
    }

    #[test]
    fn import_roundtrip_preserves_pair() {
        let pair = KeyPair::generate(counter_fill(9)).unwrap();
        let public = pair.public_key().to_sec1_bytes();
        let private = pair.private_key().to_bytes();

        let imported = KeyPair::from_parts(&public, private.as_slice()).unwrap();
        assert_eq!(imported.public_key(), pair.public_key());
    }

    #[test]
    fn import_rejects_mismatched_halves() {
        let a = KeyPair::generate(counter_fill(9)).unwrap();
        let b = KeyPair::generate(counter_fill(90)).unwrap();

        let private = b.private_key().to_bytes();
        let result = KeyPair::from_parts(&a.public_key().to_sec1_bytes(), private.as_slice());
        assert!(matches!(result, Err(CryptoError::KeyMismatch)));
    }
}
