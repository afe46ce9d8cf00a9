//! X25519 Diffie-Hellman with low-order point rejection (L0).

use rand_core::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhError {
    #[error("DH output is low-order (all-zero)")]
    LowOrderOutput,
    #[error("peer public key is a known low-order point")]
    LowOrderPublicKey,
}

/// A 32-byte X25519 key pair. `secret` is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    pub public: [u8; 32],
    secret: [u8; 32],
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let public = PublicKey::from(&StaticSecret::from(secret));
        KeyPair {
            public: public.to_bytes(),
            secret,
        }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }
}

/// The canonical small-order points on Curve25519 (order 1, 2, 4, or 8),
/// including the all-zero point. An honest peer's ephemeral/static public key
/// never legitimately takes one of these values.
const LOW_ORDER_POINTS: [[u8; 32]; 7] = [
    [0u8; 32],
    [
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0,
    ],
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    [
        0x5f, 0x9c, 0x95, 0xbc, 0xa3, 0x50, 0x8c, 0x24, 0xb1, 0xd0, 0xb1, 0x55, 0x9c, 0x83, 0xef,
        0x5b, 0x04, 0x44, 0x5c, 0xc4, 0x58, 0x1c, 0x8e, 0x86, 0xd8, 0x22, 0x4e, 0xdd, 0xd0, 0x9f,
        0x11, 0x57,
    ],
    [
        0xec, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff,
    ],
    [
        0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
];

/// Compute DH(our_secret, their_public), rejecting low-order inputs/outputs.
pub fn agree(our_secret: &[u8; 32], their_public: &[u8; 32]) -> Result<[u8; 32], DhError> {
    if LOW_ORDER_POINTS.iter().any(|p| p == their_public) {
        return Err(DhError::LowOrderPublicKey);
    }

    let secret = StaticSecret::from(*our_secret);
    let public = PublicKey::from(*their_public);
    let shared = secret.diffie_hellman(&public);
    let mut out = shared.to_bytes();

    if out.iter().all(|&b| b == 0) {
        out.zeroize();
        return Err(DhError::LowOrderOutput);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agree_rejects_zero_point() {
        let kp = KeyPair::generate();
        let err = agree(kp.secret_bytes(), &[0u8; 32]).unwrap_err();
        assert_eq!(err, DhError::LowOrderPublicKey);
    }

    #[test]
    fn agree_is_symmetric() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let ab = agree(a.secret_bytes(), &b.public).unwrap();
        let ba = agree(b.secret_bytes(), &a.public).unwrap();
        assert_eq!(ab, ba);
    }
}
