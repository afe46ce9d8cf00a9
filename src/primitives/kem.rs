//! ML-KEM-1024 (NIST FIPS 203) key encapsulation (L0).
//!
//! Grounded on the teacher's `crypto::pqc` module, which already migrated
//! from `pqc_kyber` to the official `ml-kem` RustCrypto crate. This module
//! keeps only the raw KEM contract (keygen/encapsulate/decapsulate) — the
//! hybrid hand-shake combination with X25519 lives in `session::builder`,
//! and the per-epoch chunked transport lives in `spqr::kem_state`.

use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{Encoded, EncodedSizeUser, KemCore, MlKem1024};
use rand::rngs::OsRng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use zeroize::Zeroize;

/// ML-KEM-1024 encapsulation key (public) size in bytes.
pub const EK_BYTES: usize = 1568;
/// ML-KEM-1024 ciphertext size in bytes.
pub const CT_BYTES: usize = 1568;
/// ML-KEM-1024 decapsulation key (secret) size in bytes.
pub const DK_BYTES: usize = 3168;
/// Shared secret size in bytes.
pub const SS_BYTES: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KemError {
    #[error("ML-KEM key generation failed")]
    KeyGenFailed,
    #[error("ML-KEM encapsulation failed")]
    EncapsulateFailed,
    #[error("ML-KEM decapsulation failed")]
    DecapsulateFailed,
    #[error("wrong encapsulation key length")]
    BadEkLength,
    #[error("wrong decapsulation key length")]
    BadDkLength,
    #[error("wrong ciphertext length")]
    BadCiphertextLength,
}

/// An ML-KEM-1024 key pair. `decapsulation_key` is zeroized on drop.
pub struct KemKeyPair {
    pub encapsulation_key: Vec<u8>,
    decapsulation_key: Vec<u8>,
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.decapsulation_key.zeroize();
    }
}

impl KemKeyPair {
    pub fn decapsulation_key(&self) -> &[u8] {
        &self.decapsulation_key
    }
}

/// Generate a fresh ML-KEM-1024 key pair.
pub fn generate() -> KemKeyPair {
    let (dk, ek) = MlKem1024::generate(&mut OsRng);
    KemKeyPair {
        encapsulation_key: ek.as_bytes().to_vec(),
        decapsulation_key: dk.as_bytes().to_vec(),
    }
}

/// Generate an ML-KEM-1024 key pair deterministically from a 32-byte seed,
/// grounded on the teacher's `ChaCha20Rng::from_seed`-driven hybrid keygen.
/// Used for reproducible test fixtures and known-answer vectors; online
/// session establishment always uses [`generate`].
pub fn generate_from_seed(seed: &[u8; 32]) -> KemKeyPair {
    let mut rng = ChaCha20Rng::from_seed(*seed);
    let (dk, ek) = MlKem1024::generate(&mut rng);
    KemKeyPair {
        encapsulation_key: ek.as_bytes().to_vec(),
        decapsulation_key: dk.as_bytes().to_vec(),
    }
}

/// Encapsulate against a peer's encapsulation key, returning
/// `(ciphertext, shared_secret)`.
pub fn encapsulate(encapsulation_key: &[u8]) -> Result<(Vec<u8>, [u8; SS_BYTES]), KemError> {
    if encapsulation_key.len() != EK_BYTES {
        return Err(KemError::BadEkLength);
    }
    let encoded: Encoded<<MlKem1024 as KemCore>::EncapsulationKey> =
        Encoded::<<MlKem1024 as KemCore>::EncapsulationKey>::try_from(encapsulation_key)
            .map_err(|_| KemError::BadEkLength)?;
    let ek = <MlKem1024 as KemCore>::EncapsulationKey::from_bytes(&encoded);

    let (ct, ss) = ek
        .encapsulate(&mut OsRng)
        .map_err(|_| KemError::EncapsulateFailed)?;

    let mut shared = [0u8; SS_BYTES];
    shared.copy_from_slice(&ss);
    Ok((ct.to_vec(), shared))
}

/// Decapsulate a ciphertext using our decapsulation key.
pub fn decapsulate(
    decapsulation_key: &[u8],
    ciphertext: &[u8],
) -> Result<[u8; SS_BYTES], KemError> {
    if decapsulation_key.len() != DK_BYTES {
        return Err(KemError::BadDkLength);
    }
    if ciphertext.len() != CT_BYTES {
        return Err(KemError::BadCiphertextLength);
    }

    let encoded_dk: Encoded<<MlKem1024 as KemCore>::DecapsulationKey> =
        Encoded::<<MlKem1024 as KemCore>::DecapsulationKey>::try_from(decapsulation_key)
            .map_err(|_| KemError::BadDkLength)?;
    let dk = <MlKem1024 as KemCore>::DecapsulationKey::from_bytes(&encoded_dk);

    let encoded_ct: ml_kem::Ciphertext<MlKem1024> =
        ml_kem::Ciphertext::<MlKem1024>::try_from(ciphertext)
            .map_err(|_| KemError::BadCiphertextLength)?;

    let ss = dk
        .decapsulate(&encoded_ct)
        .map_err(|_| KemError::DecapsulateFailed)?;

    let mut shared = [0u8; SS_BYTES];
    shared.copy_from_slice(&ss);
    Ok(shared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_decapsulate_agree() {
        let kp = generate();
        let (ct, ss_a) = encapsulate(&kp.encapsulation_key).unwrap();
        let ss_b = decapsulate(kp.decapsulation_key(), &ct).unwrap();
        assert_eq!(ss_a, ss_b);
    }

    #[test]
    fn seeded_keypair_is_deterministic_and_seed_dependent() {
        let seed_a = [0x42u8; 32];
        let kp_a1 = generate_from_seed(&seed_a);
        let kp_a2 = generate_from_seed(&seed_a);
        assert_eq!(kp_a1.encapsulation_key, kp_a2.encapsulation_key);
        assert_eq!(kp_a1.decapsulation_key(), kp_a2.decapsulation_key());

        let seed_b = [0x43u8; 32];
        let kp_b = generate_from_seed(&seed_b);
        assert_ne!(kp_a1.encapsulation_key, kp_b.encapsulation_key);

        let (ct, ss_a) = encapsulate(&kp_a1.encapsulation_key).unwrap();
        let ss_b = decapsulate(kp_a1.decapsulation_key(), &ct).unwrap();
        assert_eq!(ss_a, ss_b);
    }

    #[test]
    fn bad_length_inputs_rejected() {
        assert_eq!(encapsulate(&[0u8; 10]).unwrap_err(), KemError::BadEkLength);
        assert_eq!(
            decapsulate(&[0u8; 10], &[0u8; CT_BYTES]).unwrap_err(),
            KemError::BadDkLength
        );
    }
}
