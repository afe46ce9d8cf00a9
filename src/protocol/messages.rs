//! Wire message types (§6): `SignalMessage` (`TripleRatchetSignalMessage`)
//! and `PreKeySignalMessage` (`TripleRatchetPreKeySignalMessage`).

use crate::error::{RatchetError, Result};
use crate::identity::{djb_prefixed, parse_djb_prefixed};
use crate::protocol::wire::{parse_fields, write_bytes_field, write_varint_field, RawField};
use crate::CURRENT_VERSION;

/// `version_byte = (version << 4) | CURRENT_VERSION`. Accepts only
/// `hi == CURRENT_VERSION`; `hi < CURRENT_VERSION` is legacy, `hi >
/// CURRENT_VERSION` is unrecognized (§6, §9 testable property 6).
pub fn version_byte(version: u8) -> u8 {
    (version << 4) | CURRENT_VERSION
}

pub fn parse_version_byte(byte: u8) -> Result<u8> {
    let hi = byte >> 4;
    if hi < CURRENT_VERSION {
        return Err(RatchetError::InvalidMessage(
            "legacy ciphertext version".to_string(),
        ));
    }
    if hi > CURRENT_VERSION {
        return Err(RatchetError::InvalidMessage(format!(
            "unrecognized ciphertext version {hi}"
        )));
    }
    Ok(hi)
}

/// A regular ratchet message (§6 `SignalMessage v4`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalMessage {
    pub ratchet_key: [u8; 32],
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    /// SPQR chunk payload, omitted from the wire when empty (§6 field 5).
    pub pq_ratchet: Option<Vec<u8>>,
}

impl SignalMessage {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_bytes_field(&mut out, 1, &djb_prefixed(&self.ratchet_key));
        write_varint_field(&mut out, 2, self.counter as u64);
        write_varint_field(&mut out, 3, self.previous_counter as u64);
        write_bytes_field(&mut out, 4, &self.ciphertext);
        if let Some(pq) = &self.pq_ratchet {
            if !pq.is_empty() {
                write_bytes_field(&mut out, 5, pq);
            }
        }
        out
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut ratchet_key = None;
        let mut counter = None;
        let mut previous_counter = None;
        let mut ciphertext = None;
        let mut pq_ratchet = None;

        for (field_num, field) in parse_fields(body)? {
            match (field_num, field) {
                (1, RawField::Bytes(b)) => ratchet_key = Some(parse_djb_prefixed(b)?),
                (2, RawField::Varint(v)) => counter = Some(v as u32),
                (3, RawField::Varint(v)) => previous_counter = Some(v as u32),
                (4, RawField::Bytes(b)) => ciphertext = Some(b.to_vec()),
                (5, RawField::Bytes(b)) => pq_ratchet = Some(b.to_vec()),
                _ => {}
            }
        }

        Ok(SignalMessage {
            ratchet_key: ratchet_key
                .ok_or_else(|| RatchetError::InvalidMessage("missing ratchet_key".to_string()))?,
            counter: counter
                .ok_or_else(|| RatchetError::InvalidMessage("missing counter".to_string()))?,
            previous_counter: previous_counter.unwrap_or(0),
            ciphertext: ciphertext
                .ok_or_else(|| RatchetError::InvalidMessage("missing ciphertext".to_string()))?,
            pq_ratchet,
        })
    }

    /// `version_byte || proto_body || mac(8)`.
    pub fn encode(&self, version: u8, mac: &[u8; 8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 64 + self.ciphertext.len());
        out.push(version_byte(version));
        out.extend(self.encode_body());
        out.extend_from_slice(mac);
        out
    }

    /// Returns `(session_version, message, body_bytes_for_mac, mac)`.
    /// `body_bytes_for_mac` is the exact slice the MAC was computed over
    /// (§4.4 step 5: "bit-exact over version || proto, with MAC trailer
    /// excluded").
    pub fn decode(wire: &[u8]) -> Result<(u8, Self, &[u8], [u8; 8])> {
        if wire.len() < 1 + 8 {
            return Err(RatchetError::InvalidMessage(
                "message too short".to_string(),
            ));
        }
        let version = parse_version_byte(wire[0])?;
        let body = &wire[1..wire.len() - 8];
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&wire[wire.len() - 8..]);
        let message = SignalMessage::decode_body(body)?;
        Ok((version, message, body, mac))
    }
}

/// The handshake-carrying wrapper (§6 `PreKeySignalMessage v4`). No MAC of
/// its own: the embedded `message` bytes carry theirs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeySignalMessage {
    pub registration_id: u32,
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub identity_key: [u8; 32],
    /// Encoded `SignalMessage` bytes (field 6).
    pub message: Vec<u8>,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

impl PreKeySignalMessage {
    pub fn encode(&self, version: u8) -> Result<Vec<u8>> {
        if self.kyber_pre_key_id.is_some() != self.kyber_ciphertext.is_some() {
            return Err(RatchetError::InvalidMessage(
                "kyber_pre_key_id present iff kyber_ciphertext non-empty".to_string(),
            ));
        }

        let mut out = Vec::new();
        out.push(version_byte(version));
        write_varint_field(&mut out, 1, self.registration_id as u64);
        if let Some(id) = self.pre_key_id {
            write_varint_field(&mut out, 2, id as u64);
        }
        write_varint_field(&mut out, 3, self.signed_pre_key_id as u64);
        write_bytes_field(&mut out, 4, &djb_prefixed(&self.base_key));
        write_bytes_field(&mut out, 5, &djb_prefixed(&self.identity_key));
        write_bytes_field(&mut out, 6, &self.message);
        if let Some(id) = self.kyber_pre_key_id {
            write_varint_field(&mut out, 7, id as u64);
        }
        if let Some(ct) = &self.kyber_ciphertext {
            write_bytes_field(&mut out, 8, ct);
        }
        Ok(out)
    }

    pub fn decode(wire: &[u8]) -> Result<Self> {
        if wire.is_empty() {
            return Err(RatchetError::InvalidMessage("empty message".to_string()));
        }
        let _version = parse_version_byte(wire[0])?;
        let body = &wire[1..];

        let mut registration_id = None;
        let mut pre_key_id = None;
        let mut signed_pre_key_id = None;
        let mut base_key = None;
        let mut identity_key = None;
        let mut message = None;
        let mut kyber_pre_key_id = None;
        let mut kyber_ciphertext = None;

        for (field_num, field) in parse_fields(body)? {
            match (field_num, field) {
                (1, RawField::Varint(v)) => registration_id = Some(v as u32),
                (2, RawField::Varint(v)) => pre_key_id = Some(v as u32),
                (3, RawField::Varint(v)) => signed_pre_key_id = Some(v as u32),
                (4, RawField::Bytes(b)) => base_key = Some(parse_djb_prefixed(b)?),
                (5, RawField::Bytes(b)) => identity_key = Some(parse_djb_prefixed(b)?),
                (6, RawField::Bytes(b)) => message = Some(b.to_vec()),
                (7, RawField::Varint(v)) => kyber_pre_key_id = Some(v as u32),
                (8, RawField::Bytes(b)) => kyber_ciphertext = Some(b.to_vec()),
                _ => {}
            }
        }

        if kyber_pre_key_id.is_some() != kyber_ciphertext.is_some() {
            return Err(RatchetError::InvalidMessage(
                "inconsistent kyber fields".to_string(),
            ));
        }

        Ok(PreKeySignalMessage {
            registration_id: registration_id.ok_or_else(|| {
                RatchetError::InvalidMessage("missing registration_id".to_string())
            })?,
            pre_key_id,
            signed_pre_key_id: signed_pre_key_id.ok_or_else(|| {
                RatchetError::InvalidMessage("missing signed_pre_key_id".to_string())
            })?,
            base_key: base_key
                .ok_or_else(|| RatchetError::InvalidMessage("missing base_key".to_string()))?,
            identity_key: identity_key
                .ok_or_else(|| RatchetError::InvalidMessage("missing identity_key".to_string()))?,
            message: message
                .ok_or_else(|| RatchetError::InvalidMessage("missing message".to_string()))?,
            kyber_pre_key_id,
            kyber_ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> SignalMessage {
        SignalMessage {
            ratchet_key: [0x11u8; 32],
            counter: 7,
            previous_counter: 3,
            ciphertext: b"ciphertext bytes".to_vec(),
            pq_ratchet: None,
        }
    }

    #[test]
    fn signal_message_roundtrip() {
        let msg = sample_message();
        let mac = [0xAAu8; 8];
        let wire = msg.encode(4, &mac);
        assert_eq!(wire[0], 0x44);
        let (version, decoded, _body, decoded_mac) = SignalMessage::decode(&wire).unwrap();
        assert_eq!(version, 4);
        assert_eq!(decoded, msg);
        assert_eq!(decoded_mac, mac);
    }

    #[test]
    fn signal_message_with_pq_ratchet_roundtrip() {
        let mut msg = sample_message();
        msg.pq_ratchet = Some(vec![0x01, 0x02, 0x03]);
        let wire = msg.encode(4, &[0u8; 8]);
        let (_, decoded, _, _) = SignalMessage::decode(&wire).unwrap();
        assert_eq!(decoded.pq_ratchet, msg.pq_ratchet);
    }

    #[test]
    fn legacy_version_rejected() {
        let mut wire = vec![0x33u8];
        wire.extend(sample_message().encode_body());
        wire.extend_from_slice(&[0u8; 8]);
        let err = SignalMessage::decode(&wire).unwrap_err();
        assert!(err.to_string().contains("legacy"));
    }

    #[test]
    fn unrecognized_version_rejected() {
        let mut wire = vec![0x54u8];
        wire.extend(sample_message().encode_body());
        wire.extend_from_slice(&[0u8; 8]);
        assert!(SignalMessage::decode(&wire).is_err());
    }

    #[test]
    fn prekey_message_roundtrip_with_kyber() {
        let inner = sample_message().encode(4, &[0x77u8; 8]);
        let pkm = PreKeySignalMessage {
            registration_id: 42,
            pre_key_id: Some(1),
            signed_pre_key_id: 1,
            base_key: [0x22u8; 32],
            identity_key: [0x33u8; 32],
            message: inner,
            kyber_pre_key_id: Some(9),
            kyber_ciphertext: Some(vec![0xAB; 1568]),
        };
        let wire = pkm.encode(4).unwrap();
        let decoded = PreKeySignalMessage::decode(&wire).unwrap();
        assert_eq!(decoded, pkm);
    }

    #[test]
    fn prekey_message_rejects_inconsistent_kyber_fields() {
        let pkm = PreKeySignalMessage {
            registration_id: 1,
            pre_key_id: None,
            signed_pre_key_id: 1,
            base_key: [0u8; 32],
            identity_key: [0u8; 32],
            message: vec![],
            kyber_pre_key_id: Some(1),
            kyber_ciphertext: None,
        };
        assert!(pkm.encode(4).is_err());
    }
}
