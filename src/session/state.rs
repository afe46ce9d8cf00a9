//! Layer L2 — immutable-per-transaction session state (§3, §4.5).
//!
//! `SessionState` holds one session's root key, its single active sender
//! chain, and a bounded set of receiver chains. `SessionRecord` wraps the
//! current state plus a bounded history of previous states, mirroring the
//! teacher's pattern of keeping "previous session states" around so a
//! decrypt can fall back to an older chain after a ratchet step raced with
//! an in-flight message.

use std::collections::VecDeque;

use crate::identity::IdentityKey;
use crate::keys::{ChainKey, MessageKeys, RootKey};
use crate::primitives::dh::KeyPair;
use crate::{MAX_MESSAGE_KEYS, MAX_RECEIVER_CHAINS, MAX_UNACKNOWLEDGED_SESSION_AGE_MS};

/// Bound on `SessionRecord`'s previous-states history (§3 "history kept as
/// previous states").
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// The local sender chain: our current ratchet key pair plus its chain key.
#[derive(Clone)]
pub struct SenderChain {
    pub ratchet_key_pair: KeyPair,
    pub chain_key: ChainKey,
}

/// A receiver chain keyed by the sender's ratchet public key (§3).
#[derive(Clone)]
pub struct ReceiverChain {
    pub ratchet_key: [u8; 32],
    pub chain_key: ChainKey,
    /// Cached out-of-order message keys, oldest first; bounded by
    /// `MAX_MESSAGE_KEYS` (§4.4 step 4d).
    pub message_keys: VecDeque<MessageKeys>,
}

impl ReceiverChain {
    pub fn new(ratchet_key: [u8; 32], chain_key: ChainKey) -> Self {
        ReceiverChain {
            ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        }
    }

    /// Store a derived key for a counter we skipped over, evicting the
    /// oldest entry if the cache is full.
    pub fn cache_message_keys(&mut self, keys: MessageKeys) {
        if self.message_keys.len() >= MAX_MESSAGE_KEYS {
            self.message_keys.pop_front();
        }
        self.message_keys.push_back(keys);
    }

    /// Remove and return a cached key for `counter`, if present (§4.4 step
    /// 4b: "consume it (removing)").
    pub fn take_message_keys(&mut self, counter: u32) -> Option<MessageKeys> {
        let idx = self.message_keys.iter().position(|k| k.counter == counter)?;
        self.message_keys.remove(idx)
    }
}

/// Info recorded by the initiator until the first inbound message
/// acknowledges the session (§3, §4.2 step 7).
///
/// The data-model table lists `preKeyId?`, `signedPreKeyId`, `baseKey`,
/// `timestamp`; the Kyber selectors are added here because §4.2 step 3/7
/// requires every `PreKeySignalMessage` sent while pending to keep carrying
/// the Kyber ciphertext, not just the first one.
#[derive(Clone)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub timestamp_ms: i64,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

/// §4.5: a `SessionState`'s relationship to its sender chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No sender chain — receive-only.
    Fresh,
    /// Sender chain exists, `pending_pre_key` set; may be `stale`.
    Pending,
    /// Sender chain exists, no pending pre-key.
    Established,
}

/// One session state (§3). `version` is the negotiated session version (3
/// legacy, 4 current — legacy sessions are never created by this crate but
/// the field exists so a persisted legacy record can still be recognized).
#[derive(Clone)]
pub struct SessionState {
    pub version: u8,
    pub local_identity: IdentityKey,
    pub remote_identity: Option<IdentityKey>,
    pub root_key: RootKey,
    pub sender_chain: Option<SenderChain>,
    pub receiver_chains: VecDeque<ReceiverChain>,
    pub pending_pre_key: Option<PendingPreKey>,
    pub local_registration_id: u32,
    pub remote_registration_id: u32,
    pub alice_base_key: Option<[u8; 32]>,
    /// The counter to stamp on the next outbound message's `previous_counter`
    /// field; updated only by a DH-ratchet step (§4.3 step 5).
    pub previous_counter: u32,
    /// The SPQR epoch engine (§4.6), present once the handshake has
    /// exchanged enough to bootstrap it. `None` for a purely classical
    /// session (PQXDH was not negotiated, or this is a legacy v3 session).
    pub spqr: Option<crate::spqr::SpqrSession>,
}

impl SessionState {
    pub fn new(
        local_identity: IdentityKey,
        remote_identity: IdentityKey,
        root_key: RootKey,
        local_registration_id: u32,
        remote_registration_id: u32,
    ) -> Self {
        SessionState {
            version: crate::CURRENT_VERSION,
            local_identity,
            remote_identity: Some(remote_identity),
            root_key,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            local_registration_id,
            remote_registration_id,
            alice_base_key: None,
            previous_counter: 0,
            spqr: None,
        }
    }

    /// Attach an SPQR epoch engine bootstrapped by the handshake (§4.2/§4.6.1).
    pub fn with_spqr(mut self, spqr: crate::spqr::SpqrSession) -> Self {
        self.spqr = Some(spqr);
        self
    }

    /// §4.5 phase, given the current wall-clock time.
    pub fn phase(&self, now_ms: i64) -> SessionPhase {
        match (&self.sender_chain, &self.pending_pre_key) {
            (None, _) => SessionPhase::Fresh,
            (Some(_), Some(pending)) => {
                if pending.timestamp_ms + MAX_UNACKNOWLEDGED_SESSION_AGE_MS < now_ms {
                    SessionPhase::Pending // stale; caller distinguishes via `is_stale`
                } else {
                    SessionPhase::Pending
                }
            }
            (Some(_), None) => SessionPhase::Established,
        }
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        matches!(
            (&self.sender_chain, &self.pending_pre_key),
            (Some(_), Some(_))
        ) && self
            .pending_pre_key
            .as_ref()
            .is_some_and(|p| p.timestamp_ms + MAX_UNACKNOWLEDGED_SESSION_AGE_MS < now_ms)
    }

    pub fn has_usable_sender_chain(&self, now_ms: i64) -> bool {
        self.sender_chain.is_some() && !self.is_stale(now_ms)
    }

    pub fn find_receiver_chain(&self, ratchet_key: &[u8; 32]) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|c| &c.ratchet_key == ratchet_key)
    }

    pub fn find_receiver_chain_mut(&mut self, ratchet_key: &[u8; 32]) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|c| &c.ratchet_key == ratchet_key)
    }

    /// Append a freshly ratcheted receiver chain, evicting the oldest if
    /// over `MAX_RECEIVER_CHAINS` (§4.3 step 4).
    pub fn add_receiver_chain(&mut self, chain: ReceiverChain) {
        if self.receiver_chains.len() >= MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
        self.receiver_chains.push_back(chain);
    }
}

/// Wraps the current `SessionState` plus bounded history (§3 `SessionRecord`).
#[derive(Clone)]
pub struct SessionRecord {
    pub current: SessionState,
    pub previous: VecDeque<SessionState>,
}

impl SessionRecord {
    pub fn new(current: SessionState) -> Self {
        SessionRecord {
            current,
            previous: VecDeque::new(),
        }
    }

    /// §4.3 step 4: archive the current state (pending pre-key cleared, per
    /// testable property 10) ahead of installing a freshly ratcheted state.
    pub fn archive_current_state(&mut self) {
        let mut archived = self.current.clone();
        archived.pending_pre_key = None;
        if self.previous.len() >= ARCHIVED_STATES_MAX_LENGTH {
            self.previous.pop_front();
        }
        self.previous.push_back(archived);
    }

    /// States to attempt a decrypt against, current first (§4.4 step 4).
    pub fn all_states(&self) -> impl Iterator<Item = &SessionState> {
        std::iter::once(&self.current).chain(self.previous.iter().rev())
    }
}
