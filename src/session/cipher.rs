//! Layer L3 — the session cipher: `encrypt`/`decrypt`, the DH ratchet step,
//! and skipped-key handling (§4.3, §4.4).

use crate::error::{RatchetError, Result};
use crate::identity::IdentityKey;
use crate::keys::MessageKeys;
use crate::primitives::{aead, dh, kdf};
use crate::protocol::messages::{version_byte, SignalMessage};
use crate::session::replay_cache;
use crate::session::state::{ReceiverChain, SenderChain, SessionRecord, SessionState};
use crate::MAX_JUMP;

fn mac_scope(sender: &IdentityKey, receiver: &IdentityKey, version: u8, body: &[u8]) -> Vec<u8> {
    let mut scope = Vec::with_capacity(33 + 33 + 1 + body.len());
    scope.extend_from_slice(&sender.serialize());
    scope.extend_from_slice(&receiver.serialize());
    scope.push(version);
    scope.extend_from_slice(body);
    scope
}

/// §4.3: the DH ratchet step triggered by an inbound message carrying a
/// `senderRatchetKey` not matching any existing receiver chain. Returns the
/// fully updated state; callers install it only after everything else about
/// the inbound message also succeeds (trial-clone discipline, §5).
pub fn dh_ratchet_step(
    state: &SessionState,
    new_sender_ratchet_pub: [u8; 32],
) -> Result<SessionState> {
    let sender_chain = state
        .sender_chain
        .as_ref()
        .ok_or_else(|| RatchetError::InvalidSession("no sender chain to ratchet from".into()))?;

    let dh_recv = dh::agree(sender_chain.ratchet_key_pair.secret_bytes(), &new_sender_ratchet_pub)?;
    let (root_after_recv, recv_chain_key) = state.root_key.step(&dh_recv);

    let new_ratchet_key_pair = dh::KeyPair::generate();
    let dh_send = dh::agree(new_ratchet_key_pair.secret_bytes(), &new_sender_ratchet_pub)?;
    let (root_after_send, send_chain_key) = root_after_recv.step(&dh_send);

    let previous_counter = sender_chain.chain_key.index;
    log::debug!(
        "DH ratchet step: new receiver chain at sender counter {}, previous sender counter {}",
        recv_chain_key.index,
        previous_counter
    );

    let mut new_state = state.clone();
    new_state.root_key = root_after_send;
    new_state.sender_chain = Some(SenderChain {
        ratchet_key_pair: new_ratchet_key_pair,
        chain_key: send_chain_key,
    });
    new_state.add_receiver_chain(ReceiverChain::new(new_sender_ratchet_pub, recv_chain_key));
    new_state.previous_counter = previous_counter;

    Ok(new_state)
}

/// The responder side of `processPreKeyBundle` never generates a sender
/// chain of its own (§4.2 only describes the initiator doing so) — a
/// responder's `SessionState` is `Fresh` until it first needs to reply. This
/// is not itself a receive-triggered DH ratchet step (§4.3 fires on an
/// inbound `senderRatchetKey` mismatch, which doesn't apply here since the
/// peer key is unchanged); it is the one-sided "send" half of §4.3 step
/// 2-3, applied against the most recently installed receiver chain's peer
/// ratchet key. `encrypt` calls this automatically so a responder can reply
/// without a caller having to special-case the first send.
pub fn bootstrap_sender_chain(state: &SessionState) -> Result<SessionState> {
    let peer_ratchet_key = state
        .receiver_chains
        .back()
        .ok_or_else(|| RatchetError::InvalidSession("no receiver chain to reply to".into()))?
        .ratchet_key;

    let ratchet_key_pair = dh::KeyPair::generate();
    let dh_send = dh::agree(ratchet_key_pair.secret_bytes(), &peer_ratchet_key)?;
    let (new_root, send_chain_key) = state.root_key.step(&dh_send);

    let mut new_state = state.clone();
    new_state.root_key = new_root;
    new_state.sender_chain = Some(SenderChain {
        ratchet_key_pair,
        chain_key: send_chain_key,
    });
    Ok(new_state)
}

/// §4.4 Encrypt: advances the sender chain by one and returns the wire bytes
/// of a `SignalMessage`. Does not know about pre-key wrapping — callers that
/// still have a `pending_pre_key` wrap the returned bytes in a
/// `PreKeySignalMessage` (see `session::builder`).
pub fn encrypt(record: &mut SessionRecord, plaintext: &[u8], now_ms: i64) -> Result<Vec<u8>> {
    if record.current.sender_chain.is_none() {
        record.current = bootstrap_sender_chain(&record.current)?;
    }
    if !record.current.has_usable_sender_chain(now_ms) {
        return Err(RatchetError::InvalidSession(
            "no usable sender chain".into(),
        ));
    }
    let pq_ratchet = record
        .current
        .spqr
        .as_mut()
        .and_then(|spqr| spqr.take_outbound_bytes());
    let state = &record.current;
    let remote_identity = state
        .remote_identity
        .ok_or_else(|| RatchetError::InvalidSession("no remote identity".into()))?;

    let sender_chain = state
        .sender_chain
        .as_ref()
        .ok_or_else(|| RatchetError::InvalidSession("no sender chain".into()))?;
    let current_chain_key = sender_chain.chain_key.clone();
    let (next_chain_key, seed) = current_chain_key.advance();
    let message_keys = MessageKeys::derive(&seed, current_chain_key.index);

    let ciphertext = aead::cbc_encrypt(&message_keys.cipher_key, &message_keys.iv, plaintext);

    let message = SignalMessage {
        ratchet_key: sender_chain.ratchet_key_pair.public,
        counter: current_chain_key.index,
        previous_counter: state.previous_counter,
        ciphertext,
        pq_ratchet,
    };
    let body = message.encode_body();
    let scope = mac_scope(&state.local_identity, &remote_identity, version_byte(state.version), &body);
    let mac_full = kdf::hmac_sha256(&message_keys.mac_key, &scope);
    let mut mac = [0u8; 8];
    mac.copy_from_slice(&mac_full[..8]);

    let wire = message.encode(state.version, &mac);

    record.current.sender_chain = Some(SenderChain {
        ratchet_key_pair: sender_chain.ratchet_key_pair.clone(),
        chain_key: next_chain_key,
    });

    Ok(wire)
}

/// §4.4 Decrypt, steps 4-6, given an already-located session (no pre-key
/// handshake involved). On any failure the caller's `record` is untouched —
/// this function only mutates `record` right before returning `Ok`.
pub fn decrypt(record: &mut SessionRecord, wire: &[u8], now_ms: i64) -> Result<Vec<u8>> {
    let (version, message, body, mac) = SignalMessage::decode(wire).map_err(|e| {
        log::warn!("decrypt: failed to parse wire message: {e}");
        e
    })?;

    // Defense in depth beyond each chain's own counter bookkeeping: a
    // byte-identical wire message from the same sender, seen before, is
    // always a replay regardless of which candidate state it's checked
    // against below (e.g. a consumed message key re-derived after the
    // record was restored from an older persisted snapshot).
    if let Some(remote_identity) = record.current.remote_identity {
        let hash = replay_cache::hash_ciphertext(wire);
        if !replay_cache::check_and_insert(remote_identity.serialize(), hash, now_ms) {
            log::debug!("decrypt: dropping byte-identical retransmission (replay cache)");
            return Err(RatchetError::DuplicateMessage);
        }
    }

    // Most-recently-archived first (`archive_current_state` pushes to the
    // back), matching `SessionRecord::all_states`'s ordering (§4.4 step 4).
    for (is_current, candidate) in std::iter::once((true, record.current.clone()))
        .chain(record.previous.iter().rev().cloned().map(|s| (false, s)))
    {
        match try_decrypt_against_state(&candidate, version, &message, body, &mac) {
            Ok((plaintext, new_state, did_ratchet)) => {
                if is_current {
                    // §4.3 step 4: a DH ratchet step against the current
                    // state archives the pre-ratchet state to history before
                    // the new chain replaces it. A decrypt that only
                    // advanced an existing chain (no ratchet) just replaces
                    // `current` in place — nothing to archive.
                    if did_ratchet {
                        record.archive_current_state();
                    }
                    record.current = new_state;
                } else {
                    // Promote the successful historical state to current;
                    // the one it displaces joins history.
                    let displaced = std::mem::replace(&mut record.current, new_state);
                    record.previous.retain(|s| {
                        !(s.remote_identity == candidate.remote_identity
                            && s.root_key == candidate.root_key)
                    });
                    record.previous.push_back(displaced);
                }
                return Ok(plaintext);
            }
            Err(RatchetError::DuplicateMessage) => {
                log::debug!("decrypt: counter {} already consumed, dropping as duplicate", message.counter);
                return Err(RatchetError::DuplicateMessage);
            }
            Err(e) => {
                log::trace!("decrypt: candidate state rejected message (counter {}): {e}", message.counter);
                continue;
            }
        }
    }

    log::warn!(
        "decrypt: no session state (current or archived) could decrypt counter {}",
        message.counter
    );
    Err(RatchetError::InvalidSession(
        "no session state could decrypt this message".into(),
    ))
}

fn try_decrypt_against_state(
    state: &SessionState,
    version: u8,
    message: &SignalMessage,
    body: &[u8],
    mac: &[u8; 8],
) -> Result<(Vec<u8>, SessionState, bool)> {
    let remote_identity = state
        .remote_identity
        .ok_or_else(|| RatchetError::InvalidSession("no remote identity".into()))?;

    // Step 4a: locate or create the receiver chain.
    let did_ratchet = state.find_receiver_chain(&message.ratchet_key).is_none();
    let mut working = if did_ratchet {
        dh_ratchet_step(state, message.ratchet_key)?
    } else {
        state.clone()
    };

    let chain = working
        .find_receiver_chain_mut(&message.ratchet_key)
        .ok_or_else(|| RatchetError::InvalidSession("receiver chain missing after ratchet".into()))?;

    // Step 4b: a cached out-of-order key answers this counter directly.
    let message_keys = if let Some(keys) = chain.take_message_keys(message.counter) {
        keys
    } else if message.counter < chain.chain_key.index {
        return Err(RatchetError::DuplicateMessage);
    } else {
        let gap = message.counter - chain.chain_key.index;
        if gap > MAX_JUMP {
            return Err(RatchetError::KeyJump {
                requested: gap as u64,
                max: MAX_JUMP as u64,
            });
        }
        // Step 4d: advance the chain, caching every intermediate key.
        let mut current = chain.chain_key.clone();
        let mut target_keys = None;
        while current.index <= message.counter {
            let (next, seed) = current.advance();
            let derived = MessageKeys::derive(&seed, current.index);
            if current.index == message.counter {
                target_keys = Some(derived);
            } else {
                chain.cache_message_keys(derived);
            }
            current = next;
        }
        chain.chain_key = current;
        target_keys.ok_or_else(|| RatchetError::InvalidSession("counter derivation failed".into()))?
    };

    // Step 5: verify the MAC over the exact received bytes.
    let scope = mac_scope(&remote_identity, &working.local_identity, version_byte(version), body);
    let mac_full = kdf::hmac_sha256(&message_keys.mac_key, &scope);
    aead::verify_mac(&mac_full[..8], mac)?;

    // Step 6: decrypt the payload.
    let plaintext = aead::cbc_decrypt(&message_keys.cipher_key, &message_keys.iv, &message.ciphertext)?;

    // §4.6.3: drive the SPQR epoch engine with any attached `pq_ratchet`
    // payload, only now that the message has authenticated, and mix a
    // freshly produced epoch secret into the root key.
    if let Some(pq_ratchet) = &message.pq_ratchet {
        if let Some(spqr) = working.spqr.as_mut() {
            if let Some(epoch_secret) = spqr.handle_inbound_bytes(&working.root_key.0, pq_ratchet)? {
                working.root_key = working.root_key.mix_epoch_secret(&epoch_secret);
            }
        }
    }

    // §4.5: Pending -> Established on first inbound message for this session.
    working.pending_pre_key = None;

    Ok((plaintext, working, did_ratchet))
}
