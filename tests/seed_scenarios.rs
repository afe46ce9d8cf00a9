//! The literal seed scenarios (S1-S6) as integration tests against the
//! crate's public API, exercised end-to-end rather than against an internal
//! module's private state.

use triple_ratchet_core::identity::{
    IdentityKeyPair, KyberPreKeyRecord, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord,
};
use triple_ratchet_core::primitives::dh::{self, DhError};
use triple_ratchet_core::primitives::kem;
use triple_ratchet_core::protocol::messages::PreKeySignalMessage;
use triple_ratchet_core::session::builder::{
    process_pre_key_bundle, process_pre_key_signal_message, wrap_pre_key_message, ResponderKeys,
};
use triple_ratchet_core::session::cipher::{decrypt, encrypt};
use triple_ratchet_core::RatchetError;

struct BobKeys {
    identity: IdentityKeyPair,
    pre_key: PreKeyRecord,
    signed_pre_key: SignedPreKeyRecord,
    kyber_pre_key: KyberPreKeyRecord,
}

fn bob_keys() -> BobKeys {
    let identity = IdentityKeyPair::generate();
    let pre_key = PreKeyRecord::new(1, dh::KeyPair::generate());
    let signed_pre_key = SignedPreKeyRecord::new(1, dh::KeyPair::generate(), &identity, 0);
    let kyber_pre_key = KyberPreKeyRecord::new(1, kem::generate(), &identity, 0);
    BobKeys {
        identity,
        pre_key,
        signed_pre_key,
        kyber_pre_key,
    }
}

fn bundle(bob: &BobKeys) -> PreKeyBundle {
    PreKeyBundle {
        registration_id: 7,
        device_id: 1,
        pre_key: Some((bob.pre_key.id, bob.pre_key.key_pair.public)),
        signed_pre_key_id: bob.signed_pre_key.id,
        signed_pre_key_public: bob.signed_pre_key.key_pair.public,
        signed_pre_key_signature: bob.signed_pre_key.signature.clone(),
        identity_key: *bob.identity.identity_key(),
        kyber_pre_key: Some((
            bob.kyber_pre_key.id,
            bob.kyber_pre_key.key_pair.encapsulation_key.clone(),
            bob.kyber_pre_key.signature.clone(),
        )),
    }
}

fn responder_keys(bob: &BobKeys) -> ResponderKeys<'_> {
    ResponderKeys {
        signed_pre_key: &bob.signed_pre_key.key_pair,
        one_time_pre_key: Some(&bob.pre_key.key_pair),
        kyber_pre_key_decapsulation_key: Some(bob.kyber_pre_key.key_pair.decapsulation_key()),
    }
}

/// S1: minimal handshake, `"Hello Bob!"` round-trips, second decrypt of the
/// identical bytes raises `DuplicateMessage`.
#[test]
fn s1_minimal_handshake() {
    let alice_identity = IdentityKeyPair::generate();
    let bob = bob_keys();
    let bundle = bundle(&bob);

    let handshake = process_pre_key_bundle(&alice_identity, 1, 0, &bundle).unwrap();
    let mut alice_record = handshake.record.clone();

    let signal_wire = encrypt(&mut alice_record, b"Hello Bob!", 0).unwrap();
    let wire = wrap_pre_key_message(&handshake, alice_identity.identity_key().public_key, signal_wire).unwrap();
    let pkm = PreKeySignalMessage::decode(&wire).unwrap();

    let keys = responder_keys(&bob);
    let mut bob_record = process_pre_key_signal_message(&bob.identity, 2, &keys, &pkm).unwrap();

    let plaintext = decrypt(&mut bob_record, &pkm.message, 0).unwrap();
    assert_eq!(plaintext, b"Hello Bob!");

    let err = decrypt(&mut bob_record, &pkm.message, 0).unwrap_err();
    assert!(matches!(err, RatchetError::DuplicateMessage));
}

/// S2: two messages sent before any reply, both `PreKeySignalMessage`s; Bob
/// decrypts #1 then #2; retransmitted arrival of #1 raises `DuplicateMessage`,
/// never `InvalidKey`.
#[test]
fn s2_retransmit_before_reply() {
    let alice_identity = IdentityKeyPair::generate();
    let bob = bob_keys();
    let bundle = bundle(&bob);

    let handshake = process_pre_key_bundle(&alice_identity, 1, 0, &bundle).unwrap();
    let mut alice_record = handshake.record.clone();

    let wire1 = wrap_pre_key_message(
        &handshake,
        alice_identity.identity_key().public_key,
        encrypt(&mut alice_record, b"Message 1", 0).unwrap(),
    )
    .unwrap();
    let wire2 = wrap_pre_key_message(
        &handshake,
        alice_identity.identity_key().public_key,
        encrypt(&mut alice_record, b"Message 2", 0).unwrap(),
    )
    .unwrap();

    let pkm1 = PreKeySignalMessage::decode(&wire1).unwrap();
    let pkm2 = PreKeySignalMessage::decode(&wire2).unwrap();

    let keys = responder_keys(&bob);
    let mut bob_record = process_pre_key_signal_message(&bob.identity, 2, &keys, &pkm1).unwrap();
    let plaintext1 = decrypt(&mut bob_record, &pkm1.message, 0).unwrap();
    assert_eq!(plaintext1, b"Message 1");

    let plaintext2 = decrypt(&mut bob_record, &pkm2.message, 0).unwrap();
    assert_eq!(plaintext2, b"Message 2");

    let err = decrypt(&mut bob_record, &pkm1.message, 0).unwrap_err();
    assert!(matches!(err, RatchetError::DuplicateMessage));
}

/// S3: a wire buffer whose leading byte is `0x33` raises `InvalidMessage`
/// naming the legacy ciphertext version.
#[test]
fn s3_legacy_version_rejected() {
    use triple_ratchet_core::protocol::messages::SignalMessage;

    let mut wire = vec![0x33u8];
    wire.extend_from_slice(&[0u8; 16]); // arbitrary well-formed-looking body
    let err = SignalMessage::decode(&wire).unwrap_err();
    assert!(matches!(err, RatchetError::InvalidMessage(_)));
    assert!(err.to_string().contains("legacy"));
}

/// S4: MessageKeys derived from seed `0xAB * 32` and counter 42 match the
/// sizes and HKDF-SHA256 output the spec names.
#[test]
fn s4_mac_derivation_vector() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use triple_ratchet_core::keys::MessageKeys;

    let seed = [0xABu8; 32];
    let keys = MessageKeys::derive(&seed, 42);
    assert_eq!(keys.cipher_key.len(), 32);
    assert_eq!(keys.mac_key.len(), 32);
    assert_eq!(keys.iv.len(), 16);
    assert_eq!(keys.counter, 42);

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(&[0u8; 32]).unwrap();
    mac.update(&seed);
    let prk = mac.finalize().into_bytes();

    let mut okm = Vec::with_capacity(80);
    let mut t = Vec::new();
    let mut counter = 1u8;
    while okm.len() < 80 {
        let mut mac = HmacSha256::new_from_slice(&prk).unwrap();
        mac.update(&t);
        mac.update(b"WhisperMessageKeys");
        mac.update(&[counter]);
        t = mac.finalize().into_bytes().to_vec();
        okm.extend_from_slice(&t);
        counter += 1;
    }
    okm.truncate(80);

    assert_eq!(&keys.cipher_key[..], &okm[0..32]);
    assert_eq!(&keys.mac_key[..], &okm[32..64]);
    assert_eq!(&keys.iv[..], &okm[64..80]);
}

/// S5: SPQR wire vector for epoch=1, index=0, `Ct1Ack`.
#[test]
fn s5_spqr_wire_vector() {
    use triple_ratchet_core::spqr::message::{MsgType, SpqrMessage};

    let msg = SpqrMessage {
        epoch: 1,
        index: 0,
        msg_type: MsgType::Ct1Ack,
    };
    let encoded = msg.encode().unwrap();
    assert_eq!(encoded, vec![0x01, 0x01, 0x00, 0x04]);

    let (decoded, bytes_read) = SpqrMessage::decode(&encoded).unwrap();
    assert_eq!(decoded, msg);
    assert_eq!(bytes_read, 4);
}

/// S6: X25519 agreement against the all-zero public key raises `InvalidKey`
/// (surfaced here as the low-order-point `DhError`) naming "low-order".
#[test]
fn s6_low_order_dh_rejection() {
    let private = dh::KeyPair::generate();
    let err = dh::agree(private.secret_bytes(), &[0u8; 32]).unwrap_err();
    assert_eq!(err, DhError::LowOrderPublicKey);
    assert!(err.to_string().contains("low-order"));
}
