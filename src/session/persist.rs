//! Persisted `SessionStructure`/`SessionRecord` encoding (§6 "External
//! Interfaces"): bincode-serialized plain-data mirrors of [`SessionState`]
//! and [`SessionRecord`], distinct from the wire formats in
//! [`crate::protocol`] — this is a storage contract between a process and
//! its own store, not a format exchanged with a peer.
//!
//! Grounded on the teacher's `crypto::ratchet::RatchetState` (`crypto/ratchet.rs`):
//! a `#[derive(Serialize, Deserialize)]` struct of plain fields produced by
//! an `export_state`/`import_state` pair, round-tripped with `bincode` in
//! its own test. The SPQR epoch engine (§4.6) is intentionally not part of
//! this persisted form — §6 enumerates `SessionStructure`'s fields and it
//! has no `pq_ratchet`/epoch entry; a restored session resumes as classical
//! until the next handshake (or in-band SPQR exchange) re-bootstraps it.

use serde::{Deserialize, Serialize};

use crate::error::{RatchetError, Result};
use crate::identity::IdentityKey;
use crate::keys::{ChainKey, MessageKeys, RootKey};
use crate::primitives::dh::KeyPair;
use crate::session::state::{
    PendingPreKey, ReceiverChain, SenderChain, SessionRecord, SessionState,
};

#[derive(Serialize, Deserialize)]
struct PersistedIdentityKey {
    public_key: [u8; 32],
    signing_public_key: [u8; 32],
}

impl From<&IdentityKey> for PersistedIdentityKey {
    fn from(k: &IdentityKey) -> Self {
        PersistedIdentityKey {
            public_key: k.public_key,
            signing_public_key: k.signing_public_key,
        }
    }
}

impl From<PersistedIdentityKey> for IdentityKey {
    fn from(p: PersistedIdentityKey) -> Self {
        IdentityKey::new(p.public_key, p.signing_public_key)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedSenderChain {
    ratchet_public: [u8; 32],
    ratchet_secret: [u8; 32],
    chain_key: [u8; 32],
    chain_index: u32,
}

impl From<&SenderChain> for PersistedSenderChain {
    fn from(c: &SenderChain) -> Self {
        PersistedSenderChain {
            ratchet_public: c.ratchet_key_pair.public,
            ratchet_secret: *c.ratchet_key_pair.secret_bytes(),
            chain_key: *c.chain_key.key_bytes(),
            chain_index: c.chain_key.index,
        }
    }
}

impl From<PersistedSenderChain> for SenderChain {
    fn from(p: PersistedSenderChain) -> Self {
        SenderChain {
            ratchet_key_pair: KeyPair::from_secret_bytes(p.ratchet_secret),
            chain_key: ChainKey::new(p.chain_key, p.chain_index),
        }
    }
}

/// §6: "Receiver chain encodes stored message keys either as `(cipher_key,
/// mac_key, iv)` or as `seed` plus `index`." This crate only ever retains
/// the already-derived triple in `ReceiverChain::message_keys` (`derive` is
/// one-way), so the full-triple variant is what gets persisted.
#[derive(Serialize, Deserialize)]
struct PersistedMessageKeys {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
    iv: [u8; 16],
    counter: u32,
}

impl From<&MessageKeys> for PersistedMessageKeys {
    fn from(k: &MessageKeys) -> Self {
        PersistedMessageKeys {
            cipher_key: k.cipher_key,
            mac_key: k.mac_key,
            iv: k.iv,
            counter: k.counter,
        }
    }
}

impl From<PersistedMessageKeys> for MessageKeys {
    fn from(p: PersistedMessageKeys) -> Self {
        MessageKeys {
            cipher_key: p.cipher_key,
            mac_key: p.mac_key,
            iv: p.iv,
            counter: p.counter,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedReceiverChain {
    ratchet_key: [u8; 32],
    chain_key: [u8; 32],
    chain_index: u32,
    message_keys: Vec<PersistedMessageKeys>,
}

impl From<&ReceiverChain> for PersistedReceiverChain {
    fn from(c: &ReceiverChain) -> Self {
        PersistedReceiverChain {
            ratchet_key: c.ratchet_key,
            chain_key: *c.chain_key.key_bytes(),
            chain_index: c.chain_key.index,
            message_keys: c.message_keys.iter().map(PersistedMessageKeys::from).collect(),
        }
    }
}

impl From<PersistedReceiverChain> for ReceiverChain {
    fn from(p: PersistedReceiverChain) -> Self {
        let mut chain = ReceiverChain::new(p.ratchet_key, ChainKey::new(p.chain_key, p.chain_index));
        for keys in p.message_keys {
            chain.cache_message_keys(keys.into());
        }
        chain
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedPendingPreKey {
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: [u8; 32],
    timestamp_ms: i64,
    kyber_pre_key_id: Option<u32>,
    kyber_ciphertext: Option<Vec<u8>>,
}

impl From<&PendingPreKey> for PersistedPendingPreKey {
    fn from(p: &PendingPreKey) -> Self {
        PersistedPendingPreKey {
            pre_key_id: p.pre_key_id,
            signed_pre_key_id: p.signed_pre_key_id,
            base_key: p.base_key,
            timestamp_ms: p.timestamp_ms,
            kyber_pre_key_id: p.kyber_pre_key_id,
            kyber_ciphertext: p.kyber_ciphertext.clone(),
        }
    }
}

impl From<PersistedPendingPreKey> for PendingPreKey {
    fn from(p: PersistedPendingPreKey) -> Self {
        PendingPreKey {
            pre_key_id: p.pre_key_id,
            signed_pre_key_id: p.signed_pre_key_id,
            base_key: p.base_key,
            timestamp_ms: p.timestamp_ms,
            kyber_pre_key_id: p.kyber_pre_key_id,
            kyber_ciphertext: p.kyber_ciphertext,
        }
    }
}

/// Plain-data mirror of [`SessionState`], matching §6's `SessionStructure`
/// field list (`session_version`, identities, `root_key`, `previous_counter`,
/// `sender_chain?`, `receiver_chains[]`, `pending_pre_key?`, registration
/// ids, `alice_base_key?`). SPQR state is deliberately not part of this
/// structure; see the module docs.
#[derive(Serialize, Deserialize)]
pub struct PersistedSessionState {
    session_version: u8,
    local_identity: PersistedIdentityKey,
    remote_identity: Option<PersistedIdentityKey>,
    root_key: [u8; 32],
    previous_counter: u32,
    sender_chain: Option<PersistedSenderChain>,
    receiver_chains: Vec<PersistedReceiverChain>,
    pending_pre_key: Option<PersistedPendingPreKey>,
    local_registration_id: u32,
    remote_registration_id: u32,
    alice_base_key: Option<[u8; 32]>,
}

impl From<&SessionState> for PersistedSessionState {
    fn from(s: &SessionState) -> Self {
        PersistedSessionState {
            session_version: s.version,
            local_identity: PersistedIdentityKey::from(&s.local_identity),
            remote_identity: s.remote_identity.as_ref().map(PersistedIdentityKey::from),
            root_key: s.root_key.0,
            previous_counter: s.previous_counter,
            sender_chain: s.sender_chain.as_ref().map(PersistedSenderChain::from),
            receiver_chains: s.receiver_chains.iter().map(PersistedReceiverChain::from).collect(),
            pending_pre_key: s.pending_pre_key.as_ref().map(PersistedPendingPreKey::from),
            local_registration_id: s.local_registration_id,
            remote_registration_id: s.remote_registration_id,
            alice_base_key: s.alice_base_key,
        }
    }
}

impl From<PersistedSessionState> for SessionState {
    fn from(p: PersistedSessionState) -> Self {
        SessionState {
            version: p.session_version,
            local_identity: p.local_identity.into(),
            remote_identity: p.remote_identity.map(IdentityKey::from),
            root_key: RootKey::new(p.root_key),
            sender_chain: p.sender_chain.map(SenderChain::from),
            receiver_chains: p.receiver_chains.into_iter().map(ReceiverChain::from).collect(),
            pending_pre_key: p.pending_pre_key.map(PendingPreKey::from),
            local_registration_id: p.local_registration_id,
            remote_registration_id: p.remote_registration_id,
            alice_base_key: p.alice_base_key,
            previous_counter: p.previous_counter,
            spqr: None,
        }
    }
}

/// Plain-data mirror of [`SessionRecord`]: the current state plus its
/// bounded "previous states" history (§6).
#[derive(Serialize, Deserialize)]
pub struct PersistedSessionRecord {
    current: PersistedSessionState,
    previous: Vec<PersistedSessionState>,
}

impl From<&SessionRecord> for PersistedSessionRecord {
    fn from(r: &SessionRecord) -> Self {
        PersistedSessionRecord {
            current: PersistedSessionState::from(&r.current),
            previous: r.previous.iter().map(PersistedSessionState::from).collect(),
        }
    }
}

impl From<PersistedSessionRecord> for SessionRecord {
    fn from(p: PersistedSessionRecord) -> Self {
        SessionRecord {
            current: p.current.into(),
            previous: p.previous.into_iter().map(SessionState::from).collect(),
        }
    }
}

/// Encode a `SessionRecord` to its persisted bincode form (§6).
pub fn serialize_record(record: &SessionRecord) -> Result<Vec<u8>> {
    bincode::serialize(&PersistedSessionRecord::from(record))
        .map_err(|e| RatchetError::Store(format!("session record encode: {e}")))
}

/// Decode a `SessionRecord` from its persisted bincode form (§6). The
/// restored record has no SPQR epoch state regardless of whether the
/// original session had negotiated one.
pub fn deserialize_record(bytes: &[u8]) -> Result<SessionRecord> {
    let persisted: PersistedSessionRecord = bincode::deserialize(bytes)
        .map_err(|e| RatchetError::Store(format!("session record decode: {e}")))?;
    Ok(persisted.into())
}
