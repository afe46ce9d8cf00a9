//! HKDF-SHA256 and HMAC-SHA256 helpers shared by the key schedule (L1) and
//! the SPQR chain (L6).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256(salt, ikm, info) -> `len` bytes. Panics only if `len` exceeds
/// HKDF-SHA256's 255*32-byte output bound, which none of this crate's call
/// sites can reach (all `len` values are small compile-time constants).
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], len: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .expect("len within HKDF-SHA256 output bound");
    okm
}

/// HMAC-SHA256(key, data) -> 32 bytes.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 truncated to the first 8 bytes, used for the SignalMessage
/// MAC trailer (§6).
pub fn hmac_sha256_truncated8(key: &[u8], data: &[u8]) -> [u8; 8] {
    let full = hmac_sha256(key, data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&full[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn hkdf_is_deterministic() {
        let a = hkdf_sha256(&[0u8; 32], b"ikm", b"info", 64);
        let b = hkdf_sha256(&[0u8; 32], b"ikm", b"info", 64);
        assert_eq!(a, b);
    }

    /// RFC 4231 test case 1: HMAC-SHA256("Hi There", key = 0x0b * 20).
    #[test]
    fn hmac_sha256_rfc4231_test_case_1() {
        let key = hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let data = hex!("4869205468657265"); // "Hi There"
        let expected =
            hex!("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7");
        assert_eq!(hmac_sha256(&key, &data), expected.as_slice());
    }

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256(b"key", b"data");
        let b = hmac_sha256(b"key", b"data");
        assert_eq!(a, b);
    }
}
