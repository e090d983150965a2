//! Length-prefixed bucket padding
//!
//! Layout: `[u32 big-endian length][plaintext][filler]`, where filler is
//! `bucket - (len % bucket)` random bytes. The body after the prefix is
//! therefore always a non-zero multiple of the bucket size, which hides the
//! exact plaintext length from an observer of ciphertext sizes.

use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Default padding bucket in bytes
pub const DEFAULT_BUCKET_SIZE: usize = 256;

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Pad `plaintext` to the bucket boundary.
///
/// `fill` supplies the random filler bytes. The returned buffer holds
/// plaintext and is zeroized on drop.
///
/// # Errors
///
/// - `InvalidBucketSize`: `bucket_size` is zero
/// - `PlaintextTooLong`: length does not fit in the `u32` prefix
pub fn pad(
    plaintext: &[u8],
    bucket_size: usize,
    fill: impl FnOnce(&mut [u8]),
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if bucket_size == 0 {
        return Err(CryptoError::InvalidBucketSize(bucket_size));
    }
    let len = plaintext.len();
    let Ok(prefix) = u32::try_from(len) else {
        return Err(CryptoError::PlaintextTooLong { len });
    };

    let filler_len = bucket_size - (len % bucket_size);
    let total = LENGTH_PREFIX_SIZE + len + filler_len;

    let mut buffer = Zeroizing::new(Vec::with_capacity(total));
    buffer.extend_from_slice(&prefix.to_be_bytes());
    buffer.extend_from_slice(plaintext);
    buffer.resize(total, 0);
    fill(&mut buffer[LENGTH_PREFIX_SIZE + len..]);

    Ok(buffer)
}

/// Strip padding and return exactly the declared plaintext.
///
/// # Errors
///
/// - `PaddingIntegrity`: buffer shorter than the prefix, or declared length
///   exceeds the bytes available
pub fn unpad(padded: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let Some((prefix, body)) = padded.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return Err(CryptoError::PaddingIntegrity);
    };

    let declared = u32::from_be_bytes(*prefix) as usize;
    if declared > body.len() {
        return Err(CryptoError::PaddingIntegrity);
    }

    Ok(body[..declared].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(buffer: &mut [u8]) {
        buffer.fill(0x5A);
    }

    #[test]
    fn pad_unpad_roundtrip_at_bucket_edges() {
        for len in [0usize, 1, 255, 256, 257, 10_000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

            let padded = pad(&plaintext, DEFAULT_BUCKET_SIZE, noise).unwrap();

            assert_eq!(
                (padded.len() - LENGTH_PREFIX_SIZE) % DEFAULT_BUCKET_SIZE,
                0,
                "length {len} not aligned"
            );
            assert_eq!(unpad(&padded).unwrap(), plaintext, "roundtrip failed for length {len}");
        }
    }

    #[test]
    fn exact_multiple_gets_a_full_filler_bucket() {
        let padded = pad(&[1u8; 256], 256, noise).unwrap();
        assert_eq!(padded.len(), LENGTH_PREFIX_SIZE + 512);
    }

    #[test]
    fn empty_plaintext_fills_one_bucket() {
        let padded = pad(&[], 256, noise).unwrap();
        assert_eq!(padded.len(), LENGTH_PREFIX_SIZE + 256);
        assert_eq!(&padded[..LENGTH_PREFIX_SIZE], &[0, 0, 0, 0]);
    }

    #[test]
    fn prefix_is_big_endian() {
        let padded = pad(&[0u8; 0x0102], 256, noise).unwrap();
        assert_eq!(&padded[..LENGTH_PREFIX_SIZE], &[0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn filler_comes_from_caller() {
        let padded = pad(b"abc", 16, noise).unwrap();
        assert!(padded[LENGTH_PREFIX_SIZE + 3..].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn zero_bucket_is_rejected() {
        assert_eq!(pad(b"x", 0, noise).err(), Some(CryptoError::InvalidBucketSize(0)));
    }

    #[test]
    fn unpad_rejects_short_buffer() {
        assert_eq!(unpad(&[0, 0, 1]), Err(CryptoError::PaddingIntegrity));
        assert_eq!(unpad(&[]), Err(CryptoError::PaddingIntegrity));
    }

    #[test]
    fn unpad_rejects_overlong_declared_length() {
        let mut buffer = vec![0u8; LENGTH_PREFIX_SIZE + 8];
        buffer[..LENGTH_PREFIX_SIZE].copy_from_slice(&9u32.to_be_bytes());

        assert_eq!(unpad(&buffer), Err(CryptoError::PaddingIntegrity));
    }

    #[test]
    fn unpad_accepts_prefix_only_empty_message() {
        assert_eq!(unpad(&[0, 0, 0, 0]).unwrap(), Vec::<u8>::new());
    }
}
