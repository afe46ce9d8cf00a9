//! Identity and pre-key data model (§3): [`IdentityKey`], [`IdentityKeyPair`],
//! [`PreKeyRecord`], [`SignedPreKeyRecord`], [`KyberPreKeyRecord`], and the
//! [`PreKeyBundle`] an initiator consumes in §4.2.

use zeroize::Zeroize;

use crate::error::{RatchetError, Result};
use crate::primitives::dh::KeyPair;
use crate::primitives::kem::KemKeyPair;
use crate::primitives::sig::{self, Ed25519KeyPair, Signature};

/// DJB type tag prefixing a serialized Curve25519 public key on the wire.
pub const DJB_TYPE_TAG: u8 = 0x05;
/// Type tag prefixing a serialized ML-KEM public key on the wire (§3).
pub const KYBER_TYPE_TAG: u8 = 0x08;

/// Prefix a 32-byte X25519 public key with the DJB type tag, producing the
/// 33-byte wire form (§3: "serialized form is 33 bytes with leading type tag 0x05").
pub fn djb_prefixed(public: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = DJB_TYPE_TAG;
    out[1..].copy_from_slice(public);
    out
}

/// Parse a 33-byte DJB-prefixed public key, checking the type tag.
pub fn parse_djb_prefixed(bytes: &[u8]) -> Result<[u8; 32]> {
    if bytes.len() != 33 {
        return Err(RatchetError::InvalidKey(format!(
            "expected 33-byte DJB-prefixed key, got {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != DJB_TYPE_TAG {
        return Err(RatchetError::InvalidKey(format!(
            "expected DJB type tag 0x{:02x}, got 0x{:02x}",
            DJB_TYPE_TAG, bytes[0]
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes[1..]);
    Ok(out)
}

/// A peer or local identity's long-term public key. Immutable; equality is
/// by bytes.
///
/// The spec's data model (§3) describes a single 32-byte identity public
/// key, as in real Signal's XEdDSA design where one Curve25519 key pair
/// serves both X25519 DH and Ed25519-compatible signing via a birational
/// point-format conversion. This crate keeps the DH key pair and the
/// Ed25519 signing key pair independent (see `IdentityKeyPair::generate`)
/// rather than reimplementing that conversion, so `IdentityKey` carries both
/// public halves; only `public_key` (the DH half) is mirrored onto the
/// 33-byte wire form used by `SignalMessage`'s sender/receiver id fields
/// (§6) — `signing_public_key` is local bundle-verification metadata.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IdentityKey {
    pub public_key: [u8; 32],
    pub signing_public_key: [u8; 32],
}

impl IdentityKey {
    pub fn new(public_key: [u8; 32], signing_public_key: [u8; 32]) -> Self {
        IdentityKey {
            public_key,
            signing_public_key,
        }
    }

    /// 33-byte DJB-prefixed serialized form (§3, §6 "sender_id(33)").
    pub fn serialize(&self) -> [u8; 33] {
        djb_prefixed(&self.public_key)
    }
}

/// A local identity's key pair. The private key never leaves the trust
/// boundary — callers only ever see [`IdentityKeyPair::identity_key`] and
/// [`IdentityKeyPair::sign`]/[`IdentityKeyPair::dh_private`].
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    private_key: [u8; 32],
    signing_key: Ed25519KeyPair,
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl IdentityKeyPair {
    /// Generate a fresh identity at install time. The X25519 DH key and the
    /// Ed25519 signing key are generated independently (this crate does not
    /// rely on XEdDSA dual-use of a single Curve25519 scalar).
    pub fn generate() -> Self {
        let dh = KeyPair::generate();
        let signing_key = Ed25519KeyPair::generate();
        let identity_key = IdentityKey::new(dh.public, signing_key.public_bytes());
        IdentityKeyPair {
            identity_key,
            private_key: *dh.secret_bytes(),
            signing_key,
        }
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    pub fn dh_private(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Sign `message` with the identity's Ed25519 key (used to sign signed
    /// pre-keys and Kyber pre-keys, §4.2).
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn signing_public_key(&self) -> [u8; 32] {
        self.signing_key.public_bytes()
    }
}

/// §3: one-time X25519 pre-key. Unique id within its store; removed from the
/// store on first successful consumption.
pub struct PreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
}

impl PreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        PreKeyRecord { id, key_pair }
    }
}

/// §3: medium-lived X25519 pre-key signed by the identity key.
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub key_pair: KeyPair,
    pub signature: Signature,
    pub timestamp_ms: i64,
}

impl SignedPreKeyRecord {
    pub fn new(id: u32, key_pair: KeyPair, identity: &IdentityKeyPair, timestamp_ms: i64) -> Self {
        let signature = identity.sign(&key_pair.public);
        SignedPreKeyRecord {
            id,
            key_pair,
            signature,
            timestamp_ms,
        }
    }

    /// Verify the signature over the public key under `signer`'s identity.
    pub fn verify(&self, signer: &IdentityKey) -> Result<()> {
        sig::verify(&signer.signing_public_key, &self.key_pair.public, &self.signature)
            .map_err(RatchetError::from)
    }
}

/// §3: one-time ML-KEM pre-key, type byte 0x08 prefixes serialized keys.
pub struct KyberPreKeyRecord {
    pub id: u32,
    pub key_pair: KemKeyPair,
    pub signature: Signature,
    pub timestamp_ms: i64,
}

impl KyberPreKeyRecord {
    pub fn new(id: u32, key_pair: KemKeyPair, identity: &IdentityKeyPair, timestamp_ms: i64) -> Self {
        let signature = identity.sign(&key_pair.encapsulation_key);
        KyberPreKeyRecord {
            id,
            key_pair,
            signature,
            timestamp_ms,
        }
    }

    pub fn verify(&self, signer: &IdentityKey) -> Result<()> {
        sig::verify(
            &signer.signing_public_key,
            &self.key_pair.encapsulation_key,
            &self.signature,
        )
        .map_err(RatchetError::from)
    }
}

/// §3: the bundle an initiator fetches to run `processPreKeyBundle` (§4.2).
/// Consumed once.
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(u32, [u8; 32])>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: [u8; 32],
    pub signed_pre_key_signature: Signature,
    pub identity_key: IdentityKey,
    pub kyber_pre_key: Option<(u32, Vec<u8>, Signature)>,
}

impl PreKeyBundle {
    /// §4.2 preconditions: signed pre-key signature valid, and if Kyber is
    /// present its signature is valid too.
    pub fn verify_signatures(&self) -> Result<()> {
        sig::verify(
            &self.identity_key.signing_public_key,
            &self.signed_pre_key_public,
            &self.signed_pre_key_signature,
        )
        .map_err(RatchetError::from)?;

        if let Some((_, ek, signature)) = &self.kyber_pre_key {
            sig::verify(&self.identity_key.signing_public_key, ek, signature)
                .map_err(RatchetError::from)?;
        }

        Ok(())
    }
}

/// Store key: `(name, deviceId)` (§4.7).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProtocolAddress {
    pub name: String,
    pub device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        ProtocolAddress {
            name: name.into(),
            device_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn djb_prefix_roundtrip() {
        let raw = [0x7Fu8; 32];
        let prefixed = djb_prefixed(&raw);
        assert_eq!(prefixed[0], DJB_TYPE_TAG);
        let parsed = parse_djb_prefixed(&prefixed).unwrap();
        assert_eq!(parsed, raw);
    }

    #[test]
    fn djb_prefix_rejects_wrong_tag() {
        let mut bytes = [0u8; 33];
        bytes[0] = 0x06;
        assert!(parse_djb_prefixed(&bytes).is_err());
    }

    #[test]
    fn signed_pre_key_signature_verifies() {
        let identity = IdentityKeyPair::generate();
        let spk = KeyPair::generate();
        let record = SignedPreKeyRecord::new(1, spk, &identity, 0);
        record.verify(identity.identity_key()).unwrap();
    }

    #[test]
    fn tampered_signed_pre_key_fails_verification() {
        let identity = IdentityKeyPair::generate();
        let spk = KeyPair::generate();
        let mut record = SignedPreKeyRecord::new(1, spk, &identity, 0);
        record.signature.bytes[0] ^= 0xFF;
        assert!(record.verify(identity.identity_key()).is_err());
    }
}
