//! AES-256-CBC payload encryption with a detached HMAC-SHA256 trailer (L0).
//!
//! The session cipher (§4.4) pins AES-256-CBC for the ciphertext body and a
//! MAC computed separately over the whole envelope — not a combined AEAD
//! construction — so this module wraps `aes`/`cbc` directly rather than
//! reaching for `chacha20poly1305`/`aes-gcm`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use subtle::ConstantTimeEq;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadError {
    #[error("PKCS7 padding invalid")]
    BadPadding,
    #[error("MAC did not match")]
    MacMismatch,
}

/// AES-256-CBC encrypt with PKCS7 padding. `key` and `iv` are as derived by
/// [`crate::keys::MessageKeys`].
pub fn cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-256-CBC decrypt, stripping PKCS7 padding.
pub fn cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| AeadError::BadPadding)
}

/// Constant-time MAC comparison (§4.4 step 5: "Constant-time comparison").
pub fn mac_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Verify `expected` against a recomputed MAC, returning [`AeadError::MacMismatch`]
/// on failure instead of a bare boolean, so callers can use `?`.
pub fn verify_mac(expected: &[u8], actual: &[u8]) -> Result<(), AeadError> {
    if mac_eq(expected, actual) {
        Ok(())
    } else {
        Err(AeadError::MacMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let pt = b"attack at dawn, bring the whole chain";
        let ct = cbc_encrypt(&key, &iv, pt);
        let back = cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn mac_eq_rejects_mismatch() {
        assert!(!mac_eq(b"abcdefgh", b"abcdefgX"));
        assert!(mac_eq(b"abcdefgh", b"abcdefgh"));
    }
}
