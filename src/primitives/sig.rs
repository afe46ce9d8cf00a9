//! Tagged signature capability (L0).
//!
//! §9 calls for replacing "the multi-variant key classes (`SigningPrivateKey`,
//! `EncapsulationPrivateKey`)... with tagged sums holding their backing key
//! material" and modeling signature schemes as "a tagged variant with a
//! uniform `sign/verify` contract... the CBOR encoding is a discriminator
//! byte plus key bytes." `Ed25519` is the one scheme this crate actually
//! signs with (identity keys signing signed/Kyber pre-keys, §4.2); the rest
//! are external-collaborator contracts per §1 and carry only their tag and
//! raw bytes.

use ed25519_dalek::{Signature as EdSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigError {
    #[error("invalid key length for this algorithm")]
    InvalidKeyLength,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature does not verify")]
    VerificationFailed,
    #[error("algorithm has no local verifier (external collaborator)")]
    NoLocalVerifier,
}

/// Discriminator byte, matching the CBOR tag scheme referenced in §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    Ed25519 = 1,
    EcdsaSecp256k1 = 2,
    SchnorrSecp256k1 = 3,
    Sr25519 = 4,
    MlDsa = 5,
    Ssh = 6,
}

/// A tagged signature: algorithm discriminator plus raw signature bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub algorithm: SignatureAlgorithm,
    pub bytes: Vec<u8>,
}

/// Ed25519 keypair used to sign identity-bound pre-keys (§4.2).
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    pub fn generate() -> Self {
        Ed25519KeyPair {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Ed25519KeyPair {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature {
            algorithm: SignatureAlgorithm::Ed25519,
            bytes: sig.to_bytes().to_vec(),
        }
    }
}

/// Verify a tagged signature. Only `Ed25519` is backed by a concrete
/// implementation in this crate; any other algorithm returns
/// [`SigError::NoLocalVerifier`] so callers know to delegate to an external
/// verifier capability rather than silently treating it as invalid.
pub fn verify(public_key: &[u8], message: &[u8], signature: &Signature) -> Result<(), SigError> {
    match signature.algorithm {
        SignatureAlgorithm::Ed25519 => verify_ed25519(public_key, message, &signature.bytes),
        _ => Err(SigError::NoLocalVerifier),
    }
}

fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), SigError> {
    if public_key.len() != 32 {
        return Err(SigError::InvalidKeyLength);
    }
    if signature.len() != 64 {
        return Err(SigError::InvalidSignature);
    }

    let mut pk_bytes = [0u8; 32];
    pk_bytes.copy_from_slice(public_key);
    let verifying_key =
        VerifyingKey::from_bytes(&pk_bytes).map_err(|_| SigError::InvalidKeyLength)?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let sig = EdSignature::from_bytes(&sig_bytes);

    verifying_key
        .verify(message, &sig)
        .map_err(|_| SigError::VerificationFailed)
}
