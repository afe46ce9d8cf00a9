//! Layer L4 — X3DH/PQXDH session establishment (§4.2).

use crate::error::{RatchetError, Result};
use crate::identity::{IdentityKeyPair, PreKeyBundle};
use crate::keys::RootKey;
use crate::primitives::{dh, kdf, kem};
use crate::protocol::messages::{PreKeySignalMessage, SignalMessage};
use crate::session::cipher;
use crate::session::state::{PendingPreKey, SenderChain, SessionRecord, SessionState};

const DISCRIMINATOR: [u8; 32] = [0xFFu8; 32];
const ROOT_KDF_INFO: &[u8] = b"WhisperText";

fn derive_initial_root(material: &[u8]) -> (RootKey, [u8; 32]) {
    let okm = kdf::hkdf_sha256(&[0u8; 32], material, ROOT_KDF_INFO, 64);
    let mut root = [0u8; 32];
    let mut chain0 = [0u8; 32];
    root.copy_from_slice(&okm[..32]);
    chain0.copy_from_slice(&okm[32..]);
    (RootKey::new(root), chain0)
}

/// Result of a successful initiator handshake: the session plus the
/// selectors an integrator needs to address the `PreKeySignalMessage`
/// wrapper around the first outbound `SignalMessage`s.
pub struct InitiatorHandshake {
    pub record: SessionRecord,
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

/// §4.2 `processPreKeyBundle`, initiator side.
pub fn process_pre_key_bundle(
    local_identity: &IdentityKeyPair,
    local_registration_id: u32,
    now_ms: i64,
    bundle: &PreKeyBundle,
) -> Result<InitiatorHandshake> {
    bundle.verify_signatures().map_err(|e| {
        log::warn!("processPreKeyBundle: signature verification failed: {e}");
        e
    })?;

    let base_key = dh::KeyPair::generate();

    let dh1 = dh::agree(local_identity.dh_private(), &bundle.signed_pre_key_public)?;
    let dh2 = dh::agree(base_key.secret_bytes(), &bundle.identity_key.public_key)?;
    let dh3 = dh::agree(base_key.secret_bytes(), &bundle.signed_pre_key_public)?;
    let dh4 = match &bundle.pre_key {
        Some((_, pub_key)) => Some(dh::agree(base_key.secret_bytes(), pub_key)?),
        None => None,
    };

    let mut material = Vec::from(DISCRIMINATOR);
    material.extend_from_slice(&dh1);
    material.extend_from_slice(&dh2);
    material.extend_from_slice(&dh3);
    if let Some(dh4) = dh4 {
        material.extend_from_slice(&dh4);
    }

    let mut kyber_shared_secret = None;
    let kyber_ciphertext = match &bundle.kyber_pre_key {
        Some((_, ek, _sig)) => {
            let (ct, ss) = kem::encapsulate(ek)?;
            material.extend_from_slice(&ss);
            kyber_shared_secret = Some(ss);
            Some(ct)
        }
        None => None,
    };

    let (root0, _chain0) = derive_initial_root(&material);

    // §4.2 step 6: initial one-sided "send" DH-ratchet step using a fresh
    // local ratchet key against the peer's signed pre-key.
    let ratchet_key_pair = dh::KeyPair::generate();
    let dh_send = dh::agree(ratchet_key_pair.secret_bytes(), &bundle.signed_pre_key_public)?;
    let (root1, send_chain_key) = root0.step(&dh_send);

    let mut state = SessionState::new(
        *local_identity.identity_key(),
        bundle.identity_key,
        root1,
        local_registration_id,
        bundle.registration_id,
    );
    state.sender_chain = Some(SenderChain {
        ratchet_key_pair,
        chain_key: send_chain_key,
    });
    state.alice_base_key = Some(base_key.public);
    // §4.6.1: the initiator bootstraps the SPQR chain from the PQXDH Kyber
    // shared secret, present only when the bundle negotiated it, and starts
    // as `send_ek` so the first epoch has a header to send.
    if let Some(ss) = kyber_shared_secret {
        let mut spqr = crate::spqr::SpqrSession::new(&ss, crate::spqr::chain::Direction::A2B, true);
        spqr.kickoff(&state.root_key.0)?;
        state.spqr = Some(spqr);
    }
    state.pending_pre_key = Some(PendingPreKey {
        pre_key_id: bundle.pre_key.as_ref().map(|(id, _)| *id),
        signed_pre_key_id: bundle.signed_pre_key_id,
        base_key: base_key.public,
        timestamp_ms: now_ms,
        kyber_pre_key_id: bundle.kyber_pre_key.as_ref().map(|(id, _, _)| *id),
        kyber_ciphertext: kyber_ciphertext.clone(),
    });

    log::debug!(
        "processPreKeyBundle: installed session for registration_id {} (kyber={})",
        bundle.registration_id,
        bundle.kyber_pre_key.is_some()
    );

    Ok(InitiatorHandshake {
        record: SessionRecord::new(state),
        registration_id: local_registration_id,
        pre_key_id: bundle.pre_key.as_ref().map(|(id, _)| *id),
        signed_pre_key_id: bundle.signed_pre_key_id,
        base_key: base_key.public,
        kyber_pre_key_id: bundle.kyber_pre_key.as_ref().map(|(id, _, _)| *id),
        kyber_ciphertext,
    })
}

/// Wrap a `SignalMessage`'s wire bytes in the handshake's `PreKeySignalMessage`
/// envelope (§4.2 step 7, §4.4 step 7: "If a pending pre-key exists, wrap as
/// PreKeySignalMessage").
pub fn wrap_pre_key_message(
    handshake: &InitiatorHandshake,
    local_identity_public: [u8; 32],
    signal_message_wire: Vec<u8>,
) -> Result<Vec<u8>> {
    let pkm = PreKeySignalMessage {
        registration_id: handshake.registration_id,
        pre_key_id: handshake.pre_key_id,
        signed_pre_key_id: handshake.signed_pre_key_id,
        base_key: handshake.base_key,
        identity_key: local_identity_public,
        message: signal_message_wire,
        kyber_pre_key_id: handshake.kyber_pre_key_id,
        kyber_ciphertext: handshake.kyber_ciphertext.clone(),
    };
    pkm.encode(crate::CURRENT_VERSION)
}

/// Key material a responder's stores must have resolved before calling
/// [`process_pre_key_signal_message`]: the signed pre-key the message names,
/// optionally the one-time pre-key and Kyber pre-key it names. Consuming
/// (removing) the one-time and Kyber pre-keys from the store is the caller's
/// responsibility (§4.7 `PreKeyStore`/`KyberPreKeyStore`).
pub struct ResponderKeys<'a> {
    pub signed_pre_key: &'a dh::KeyPair,
    pub one_time_pre_key: Option<&'a dh::KeyPair>,
    pub kyber_pre_key_decapsulation_key: Option<&'a [u8]>,
}

/// §4.2 responder side: reverse the initiator's derivation using the local
/// identity and the pre-key ids the message names, then seed the initial
/// receiver chain from the embedded `SignalMessage`'s ratchet key.
pub fn process_pre_key_signal_message(
    local_identity: &IdentityKeyPair,
    local_registration_id: u32,
    keys: &ResponderKeys<'_>,
    pkm: &PreKeySignalMessage,
) -> Result<SessionRecord> {
    if pkm.kyber_pre_key_id.is_some() != pkm.kyber_ciphertext.is_some() {
        return Err(RatchetError::InvalidMessage(
            "inconsistent kyber fields".to_string(),
        ));
    }

    let dh1 = dh::agree(keys.signed_pre_key.secret_bytes(), &pkm.identity_key)?;
    let dh2 = dh::agree(local_identity.dh_private(), &pkm.base_key)?;
    let dh3 = dh::agree(keys.signed_pre_key.secret_bytes(), &pkm.base_key)?;
    let dh4 = match keys.one_time_pre_key {
        Some(otp) => Some(dh::agree(otp.secret_bytes(), &pkm.base_key)?),
        None => None,
    };

    let mut material = Vec::from(DISCRIMINATOR);
    material.extend_from_slice(&dh1);
    material.extend_from_slice(&dh2);
    material.extend_from_slice(&dh3);
    if let Some(dh4) = dh4 {
        material.extend_from_slice(&dh4);
    }

    let mut kyber_shared_secret = None;
    if let Some(ct) = &pkm.kyber_ciphertext {
        let dk = keys.kyber_pre_key_decapsulation_key.ok_or_else(|| {
            RatchetError::InvalidMessage("kyber ciphertext present but no decapsulation key".to_string())
        })?;
        let ss = kem::decapsulate(dk, ct)?;
        material.extend_from_slice(&ss);
        kyber_shared_secret = Some(ss);
    }

    let (root0, _chain0) = derive_initial_root(&material);

    let (_, embedded, _, _) = SignalMessage::decode(&pkm.message)?;
    let alice_ratchet_pub = embedded.ratchet_key;

    let dh_recv = dh::agree(keys.signed_pre_key.secret_bytes(), &alice_ratchet_pub)?;
    let (root1, recv_chain_key) = root0.step(&dh_recv);

    // §6 field 5 carries only the peer's DH identity key, never their Ed25519
    // signing key — the responder has nothing to sign-verify against the
    // initiator, so the signing half is set equal to the DH half as a
    // placeholder rather than left unrepresentable.
    let remote_identity = crate::identity::IdentityKey::new(pkm.identity_key, pkm.identity_key);
    let mut state = SessionState::new(
        *local_identity.identity_key(),
        remote_identity,
        root1,
        local_registration_id,
        pkm.registration_id,
    );
    state.alice_base_key = Some(pkm.base_key);
    if let Some(ss) = kyber_shared_secret {
        state.spqr = Some(crate::spqr::SpqrSession::new(
            &ss,
            crate::spqr::chain::Direction::B2A,
            false,
        ));
    }
    state.add_receiver_chain(crate::session::state::ReceiverChain::new(
        alice_ratchet_pub,
        recv_chain_key,
    ));

    Ok(SessionRecord::new(state))
}

/// §4.4 step 2, the "PreKey short-circuit" (testable property 9): given a
/// possibly-already-established `existing` session for this address, try it
/// against the embedded `SignalMessage` before consuming a fresh one-time
/// pre-key to install a new one. A retransmitted `PreKeySignalMessage` whose
/// one-time pre-key has already been removed from the store then resolves
/// against the existing session (or raises `DuplicateMessage`) instead of
/// the responder path failing with a missing pre-key.
pub fn receive_pre_key_message(
    local_identity: &IdentityKeyPair,
    local_registration_id: u32,
    keys: &ResponderKeys<'_>,
    existing: Option<&mut SessionRecord>,
    pkm: &PreKeySignalMessage,
    now_ms: i64,
) -> Result<(Vec<u8>, Option<SessionRecord>)> {
    if let Some(record) = existing {
        match cipher::decrypt(record, &pkm.message, now_ms) {
            Ok(plaintext) => {
                log::debug!("receive_pre_key_message: short-circuited to existing session");
                return Ok((plaintext, None));
            }
            Err(RatchetError::DuplicateMessage) => return Err(RatchetError::DuplicateMessage),
            Err(e) => {
                log::trace!("receive_pre_key_message: existing session could not decrypt ({e}), falling back to responder path");
            }
        }
    }
    let mut record = process_pre_key_signal_message(local_identity, local_registration_id, keys, pkm)?;
    let plaintext = cipher::decrypt(&mut record, &pkm.message, now_ms)?;
    Ok((plaintext, Some(record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
    use crate::primitives::kem as kem_mod;
    use crate::session::cipher;

    #[test]
    fn full_handshake_alice_sends_bob_decrypts() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();

        let bob_pre_key = PreKeyRecord::new(1, dh::KeyPair::generate());
        let bob_signed_pre_key = SignedPreKeyRecord::new(1, dh::KeyPair::generate(), &bob_identity, 0);
        let bob_kyber_pre_key =
            KyberPreKeyRecord::new(1, kem_mod::generate(), &bob_identity, 0);

        let bundle = PreKeyBundle {
            registration_id: 7,
            device_id: 1,
            pre_key: Some((bob_pre_key.id, bob_pre_key.key_pair.public)),
            signed_pre_key_id: bob_signed_pre_key.id,
            signed_pre_key_public: bob_signed_pre_key.key_pair.public,
            signed_pre_key_signature: bob_signed_pre_key.signature.clone(),
            identity_key: *bob_identity.identity_key(),
            kyber_pre_key: Some((
                bob_kyber_pre_key.id,
                bob_kyber_pre_key.key_pair.encapsulation_key.clone(),
                bob_kyber_pre_key.signature.clone(),
            )),
        };

        let handshake = process_pre_key_bundle(&alice_identity, 1, 0, &bundle).unwrap();
        let mut alice_record = handshake.record.clone();

        let signal_wire = cipher::encrypt(&mut alice_record, b"Hello Bob!", 0).unwrap();
        let wire = wrap_pre_key_message(
            &handshake,
            alice_identity.identity_key().public_key,
            signal_wire,
        )
        .unwrap();

        let pkm = PreKeySignalMessage::decode(&wire).unwrap();
        let responder_keys = ResponderKeys {
            signed_pre_key: &bob_signed_pre_key.key_pair,
            one_time_pre_key: Some(&bob_pre_key.key_pair),
            kyber_pre_key_decapsulation_key: Some(bob_kyber_pre_key.key_pair.decapsulation_key()),
        };
        let mut bob_record =
            process_pre_key_signal_message(&bob_identity, 2, &responder_keys, &pkm).unwrap();

        let plaintext = cipher::decrypt(&mut bob_record, &pkm.message, 0).unwrap();
        assert_eq!(plaintext, b"Hello Bob!");
    }

    /// §8 testable property 9: a retransmitted `PreKeySignalMessage` whose
    /// one-time pre-key the store has already consumed must not fail with a
    /// missing-pre-key error once a session exists that can decrypt it.
    #[test]
    fn retransmitted_pre_key_message_short_circuits_to_existing_session() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();

        let bob_pre_key = PreKeyRecord::new(1, dh::KeyPair::generate());
        let bob_signed_pre_key = SignedPreKeyRecord::new(1, dh::KeyPair::generate(), &bob_identity, 0);

        let bundle = PreKeyBundle {
            registration_id: 7,
            device_id: 1,
            pre_key: Some((bob_pre_key.id, bob_pre_key.key_pair.public)),
            signed_pre_key_id: bob_signed_pre_key.id,
            signed_pre_key_public: bob_signed_pre_key.key_pair.public,
            signed_pre_key_signature: bob_signed_pre_key.signature.clone(),
            identity_key: *bob_identity.identity_key(),
            kyber_pre_key: None,
        };

        let handshake = process_pre_key_bundle(&alice_identity, 1, 0, &bundle).unwrap();
        let mut alice_record = handshake.record.clone();
        let signal_wire = cipher::encrypt(&mut alice_record, b"first", 0).unwrap();
        let wire = wrap_pre_key_message(
            &handshake,
            alice_identity.identity_key().public_key,
            signal_wire,
        )
        .unwrap();
        let pkm = PreKeySignalMessage::decode(&wire).unwrap();

        // Bob still has his one-time pre-key for the first delivery — Alice's
        // bundle offered it, so the initiator folded it into DH4 and the
        // responder must be given the matching key or the MACs won't agree.
        let responder_keys_with_otp = ResponderKeys {
            signed_pre_key: &bob_signed_pre_key.key_pair,
            one_time_pre_key: Some(&bob_pre_key.key_pair),
            kyber_pre_key_decapsulation_key: None,
        };

        // Responder's one-time pre-key is now "gone" — simulated by a
        // `ResponderKeys` lacking it, as if the store already removed it
        // after the first delivery installed the session.
        let responder_keys_no_otp = ResponderKeys {
            signed_pre_key: &bob_signed_pre_key.key_pair,
            one_time_pre_key: None,
            kyber_pre_key_decapsulation_key: None,
        };

        // First delivery: no existing session, so the responder path runs
        // and installs one using the still-available one-time pre-key.
        let (plaintext, bob_record) = receive_pre_key_message(
            &bob_identity,
            2,
            &responder_keys_with_otp,
            None,
            &pkm,
            0,
        )
        .unwrap();
        assert_eq!(plaintext, b"first");
        let mut bob_record = bob_record.expect("fresh session should be returned");

        // Alice retransmits the identical PreKeySignalMessage (e.g. her ack
        // never arrived). Bob now has an existing session for this address;
        // the short-circuit should resolve it as a duplicate rather than
        // attempting to re-run the responder path against a consumed pre-key.
        let (_plaintext, fresh) = match receive_pre_key_message(
            &bob_identity,
            2,
            &responder_keys_no_otp,
            Some(&mut bob_record),
            &pkm,
            0,
        ) {
            Err(RatchetError::DuplicateMessage) => (Vec::new(), None),
            Ok((pt, fresh)) => (pt, fresh),
            Err(e) => panic!("unexpected error on retransmit: {e:?}"),
        };
        assert!(fresh.is_none());
    }
}
