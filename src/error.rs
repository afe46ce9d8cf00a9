//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `session`, `protocol`, and `spqr` returns
//! [`RatchetError`] so callers can match on a single type regardless of which
//! layer raised it. Internal per-module errors (e.g. [`crate::primitives::dh::DhError`])
//! convert into it via `From`.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RatchetError>;

#[derive(Error, Debug)]
pub enum RatchetError {
    /// Signature invalid, wrong key length, low-order/zero DH output, or a
    /// referenced pre-key is missing.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Wrong version, short buffer, framing failure, legacy/unrecognized
    /// version, inconsistent Kyber fields, or truncated encoding.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// MAC trailer did not match the recomputed HMAC.
    #[error("MAC verification failed")]
    InvalidMac,

    /// The message counter was already consumed (its message key was already
    /// used, or stored-and-released).
    #[error("duplicate message")]
    DuplicateMessage,

    /// No such chain, or no sender chain when one is required.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Counter skipped more than `MAX_JUMP` from the current position.
    #[error("key jump exceeds MAX_JUMP ({requested} > {max})")]
    KeyJump { requested: u64, max: u64 },

    /// An out-of-order key past `MAX_OOO_KEYS` was requested.
    #[error("key trimmed from out-of-order history")]
    KeyTrimmed,

    /// An out-of-order key was already consumed.
    #[error("key already requested")]
    KeyAlreadyRequested,

    /// SPQR epoch too far ahead of or behind the local state.
    #[error("epoch out of range: {0}")]
    EpochOutOfRange(String),

    /// A store's identity policy rejected an identity change.
    #[error("untrusted identity")]
    UntrustedIdentity,

    /// A store boundary (I/O) failure, surfaced unchanged.
    #[error("store error: {0}")]
    Store(String),
}

impl From<crate::primitives::dh::DhError> for RatchetError {
    fn from(e: crate::primitives::dh::DhError) -> Self {
        RatchetError::InvalidKey(e.to_string())
    }
}

impl From<crate::primitives::kem::KemError> for RatchetError {
    fn from(e: crate::primitives::kem::KemError) -> Self {
        RatchetError::InvalidKey(e.to_string())
    }
}

impl From<crate::primitives::aead::AeadError> for RatchetError {
    fn from(e: crate::primitives::aead::AeadError) -> Self {
        match e {
            crate::primitives::aead::AeadError::MacMismatch => RatchetError::InvalidMac,
            other => RatchetError::InvalidMessage(other.to_string()),
        }
    }
}

impl From<crate::primitives::sig::SigError> for RatchetError {
    fn from(e: crate::primitives::sig::SigError) -> Self {
        RatchetError::InvalidKey(e.to_string())
    }
}
