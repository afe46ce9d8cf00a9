//! Layer L1 — the three-tier key schedule: [`RootKey`], [`ChainKey`],
//! [`MessageKeys`]. Every derivation here is a pure function of its inputs
//! (§8 invariant 1) — no RNG, no I/O.

use zeroize::Zeroize;

use crate::primitives::kdf::{hkdf_sha256, hmac_sha256};

/// `HKDF-SHA256(salt = dh_output, ikm = root_key, info = "WhisperRatchet", len = 64)`
const ROOT_KDF_INFO: &[u8] = b"WhisperRatchet";
/// `HKDF-SHA256(salt = zero_32, ikm = seed, info = "WhisperMessageKeys", len = 80)`
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

/// The root key of a session. 32 bytes, rotated only by a DH-ratchet step or
/// SPQR epoch-secret mixing (§4.6.3).
#[derive(Clone, PartialEq, Eq)]
pub struct RootKey(pub [u8; 32]);

impl Drop for RootKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl RootKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        RootKey(bytes)
    }

    /// §4.1: one HKDF-SHA256 extraction producing a new root key and the
    /// initial chain key (index 0) of a freshly ratcheted chain. Keyed by
    /// the root key as `ikm`, salted with the DH output.
    pub fn step(&self, dh_output: &[u8; 32]) -> (RootKey, ChainKey) {
        let okm = hkdf_sha256(dh_output, &self.0, ROOT_KDF_INFO, 64);
        let mut new_root = [0u8; 32];
        let mut chain_seed = [0u8; 32];
        new_root.copy_from_slice(&okm[..32]);
        chain_seed.copy_from_slice(&okm[32..]);
        (RootKey(new_root), ChainKey::new(chain_seed, 0))
    }

    /// §4.6.3: mix an SPQR epoch secret into the root key ahead of the next
    /// DH-ratchet step. `rootKey' = HKDF(ikm = epochSecret, salt = rootKey,
    /// info = "WhisperText", len = 32)`.
    pub fn mix_epoch_secret(&self, epoch_secret: &[u8; 32]) -> RootKey {
        let okm = hkdf_sha256(&self.0, epoch_secret, b"WhisperText", 32);
        let mut new_root = [0u8; 32];
        new_root.copy_from_slice(&okm);
        RootKey(new_root)
    }
}

/// A chain key with its monotonically advancing index.
#[derive(Clone, PartialEq, Eq)]
pub struct ChainKey {
    key: [u8; 32],
    pub index: u32,
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        ChainKey { key, index }
    }

    pub fn key_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// §4.1: advance the chain by one, returning the next chain key and the
    /// 32-byte seed for this step's [`MessageKeys`].
    pub fn advance(&self) -> (ChainKey, [u8; 32]) {
        let next = hmac_sha256(&self.key, &[0x02]);
        let seed = hmac_sha256(&self.key, &[0x01]);
        (ChainKey::new(next, self.index + 1), seed)
    }
}

/// One-shot message keys: derived exactly once per counter, never reused.
#[derive(Clone)]
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
    pub counter: u32,
}

impl Drop for MessageKeys {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

impl MessageKeys {
    /// §4.1 / §8 invariant 1: HKDF-SHA256(seed, zero-salt-32, "WhisperMessageKeys", 80),
    /// sliced into cipherKey(0..32), macKey(32..64), iv(64..80).
    pub fn derive(seed: &[u8; 32], counter: u32) -> Self {
        let okm = hkdf_sha256(&[0u8; 32], seed, MESSAGE_KEYS_INFO, 80);
        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&okm[0..32]);
        mac_key.copy_from_slice(&okm[32..64]);
        iv.copy_from_slice(&okm[64..80]);
        MessageKeys {
            cipher_key,
            mac_key,
            iv,
            counter,
        }
    }
}
