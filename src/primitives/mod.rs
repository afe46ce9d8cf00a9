//! Layer L0 — primitive contracts.
//!
//! These modules wrap the "assumed correct" external collaborators named in
//! the crate's scope (X25519, HKDF/HMAC-SHA256, AES-256-CBC, Ed25519, and
//! ML-KEM-1024). Nothing above this layer reaches for a crypto crate
//! directly — it goes through here so the key schedule and session layers
//! stay algorithm-agnostic where the spec allows it.

pub mod aead;
pub mod dh;
pub mod kdf;
pub mod kem;
pub mod sig;
