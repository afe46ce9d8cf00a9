//! Triple Ratchet core: X3DH/PQXDH session establishment, the Double Ratchet
//! with hybrid post-quantum augmentation, and the SPQR epoch engine that
//! refreshes it.
//!
//! | Layer | Module |
//! |---|---|
//! | L0 primitives | [`primitives`] |
//! | L1 key schedule | [`keys`] |
//! | L2 session state | [`session::state`] |
//! | L3 session cipher | [`session::cipher`] |
//! | L4 X3DH/PQXDH builder | [`session::builder`] |
//! | L5 wire framing | [`protocol`] |
//! | L6 SPQR epoch engine | [`spqr`] |
//! | L7 store traits | [`store`] |
//!
//! This crate has no CLI or FFI surface; it is consumed as a library by
//! whatever transport and storage layer an integrator provides through
//! [`store`].

#![allow(clippy::too_many_arguments, clippy::type_complexity)]

pub mod error;
pub mod identity;
pub mod keys;
pub mod primitives;
pub mod protocol;
pub mod session;
pub mod spqr;
pub mod store;

/// Maximum number of receiver chains retained per session (§3, §4.3 step 4).
pub const MAX_RECEIVER_CHAINS: usize = 5;
/// Maximum number of cached out-of-order message keys per receiver chain (§4.4 step 4d).
pub const MAX_MESSAGE_KEYS: usize = 2000;
/// Maximum counter gap tolerated in a single decrypt before `KeyJump` (§4.4 step 4c, §4.6.1).
pub const MAX_JUMP: u32 = 25_000;
/// Maximum number of out-of-order keys retained in an SPQR directional `KeyHistory` (§4.6.1).
pub const MAX_OOO_KEYS: u32 = 2000;
/// A `Pending` session older than this (milliseconds) is "stale" (§3, §4.5).
pub const MAX_UNACKNOWLEDGED_SESSION_AGE_MS: i64 = 30 * 24 * 60 * 60 * 1000;
/// Number of SPQR epochs kept prior to `sendEpoch` before pruning (§4.6.1).
pub const EPOCHS_TO_KEEP_PRIOR_TO_SEND_EPOCH: u64 = 2;

/// Current protocol version (§4.4 step 5, §6). The version byte on the wire
/// is `(version << 4) | CURRENT_VERSION`.
pub const CURRENT_VERSION: u8 = 4;
/// Legacy pre-Kyber version, recognized for identification only (§6, §9):
/// "treat v3 as recognized for identification, rejected for acceptance".
pub const CIPHERTEXT_MESSAGE_PRE_KYBER_VERSION: u8 = 3;

pub use error::{RatchetError, Result};

/// Current wall-clock time in milliseconds since the Unix epoch, in the form
/// every `now_ms` parameter in this crate expects. Session operations take
/// time as an explicit argument rather than reading the clock themselves
/// (§8 invariant 1: every derivation is a pure function of its inputs) — this
/// helper is for callers who don't already track wall-clock time elsewhere.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod lib_tests {
    use super::now_ms;

    #[test]
    fn now_ms_is_plausible_and_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(a > 1_700_000_000_000);
        assert!(b >= a);
    }
}
