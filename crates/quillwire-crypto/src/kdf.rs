//! Key derivation using HKDF-SHA256

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Bytes produced by one derivation: a 32-byte output key followed by a
/// 32-byte next chain key.
pub const KEY_MATERIAL_SIZE: usize = 64;

/// Label for expanding the ECDH shared secret into the two chain keys
pub const ROOT_LABEL: &[u8] = b"ROOT";

/// Label for stepping a chain key into a message key and the next chain key
pub const MESSAGE_KEY_LABEL: &[u8] = b"MSG_KEY";

/// Salt used when the caller supplies none.
const ZERO_SALT: [u8; 32] = [0u8; 32];

/// Derive 64 bytes of key material with HKDF-SHA256.
///
/// `salt` defaults to 32 zero bytes when `None`. Domain separation between
/// uses comes from `info` alone in that case.
///
/// The returned buffer is zeroized when dropped.
pub fn hkdf(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Zeroizing<[u8; KEY_MATERIAL_SIZE]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt.unwrap_or(&ZERO_SALT)), input_key_material);

    let mut output = Zeroizing::new([0u8; KEY_MATERIAL_SIZE]);
    let Ok(()) = hkdf.expand(info, output.as_mut_slice()) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    output
}
