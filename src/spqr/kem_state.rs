//! The chunked ML-KEM state machine (§4.6.2).
//!
//! A full ML-KEM-1024 encapsulation key (1568 B), decapsulation key (3168 B),
//! and ciphertext (1568 B) do not fit in one message, so they cross the wire
//! as [`crate::spqr::poly`] chunks carried by [`crate::spqr::message::SpqrMessage`].
//! Two peers alternate roles per epoch: one runs [`SendEkMachine`] (ships the
//! ML-KEM public key), the other [`SendCtMachine`] (ships the ciphertext).
//!
//! Grounded on the teacher's `crypto::pq_ratchet::PQRatchetState` — a small
//! `struct` driving forward through named states with a single "advance and
//! maybe yield key material" entry point, `Drop`-zeroized secret fields, and
//! a `thiserror` error enum local to the module — generalized here to the
//! two-role, multi-message handshake §4.6.2 describes instead of the
//! teacher's one-shot hybrid-secret-to-ratchet derivation.
//!
//! §9 open question: the source emulates a 2-phase ML-KEM handshake
//! (`encaps1`/`encaps2`) it cannot actually do, by sending a placeholder
//! all-zero `Ct1` chunk set and carrying the real ciphertext entirely in
//! `Ct2`. This module follows that emulation for wire-shape fidelity to the
//! spec rather than inventing a real incremental KEM; interop is therefore
//! limited to peers using the same emulation, exactly as the open question
//! warns.

use crate::error::{RatchetError, Result};
use crate::primitives::kdf::hmac_sha256;
use crate::primitives::kem;
use crate::spqr::message::{Chunk, MsgType, SpqrMessage};
use crate::spqr::poly::{PolyDecoder, PolyEncoder, CHUNK_SIZE};

/// ML-KEM-1024 ciphertexts are fixed-size, so the chunk count for both the
/// placeholder `Ct1` and the real `Ct2` is a compile-time constant both
/// sides already know — no header round-trip needed for it the way the
/// encapsulation key's (variable relative to `CHUNK_SIZE`) chunk count
/// needs one.
pub(crate) const CT_CHUNKS: usize = kem::CT_BYTES.div_ceil(CHUNK_SIZE);

/// A 32-byte ML-KEM shared secret, produced exactly once per side per epoch
/// (§4.6.2 "Key production rule") and mixed into the outer root key via
/// [`crate::keys::RootKey::mix_epoch_secret`] (§4.6.3).
pub type EpochSecret = [u8; 32];

/// Authenticates committed public-key header bytes across message
/// boundaries (§4.6.2 "Authentication"). Derived per epoch from
/// `(rootKey, macKey)`; keyed HMAC-SHA256, truncated to 16 bytes on the wire.
pub struct Authenticator {
    key: [u8; 32],
}

const AUTHENTICATOR_INFO: &[u8] = b"Signal PQ Ratchet V1 Header Auth";

impl Authenticator {
    /// Derive the per-epoch authenticator key from the outer root key and
    /// the SPQR chain's current MAC key material.
    pub fn derive(root_key: &[u8; 32], mac_key: &[u8; 32]) -> Self {
        let mut ikm = Vec::with_capacity(64);
        ikm.extend_from_slice(root_key);
        ikm.extend_from_slice(mac_key);
        let key = hmac_sha256(&ikm, AUTHENTICATOR_INFO);
        Authenticator { key }
    }

    pub fn tag(&self, header_bytes: &[u8]) -> [u8; 16] {
        let full = hmac_sha256(&self.key, header_bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    pub fn verify(&self, header_bytes: &[u8], tag: &[u8; 16]) -> Result<()> {
        let expected = self.tag(header_bytes);
        if crate::primitives::aead::mac_eq(&expected, tag) {
            Ok(())
        } else {
            Err(RatchetError::InvalidMessage(
                "SPQR header authentication failed".to_string(),
            ))
        }
    }
}

/// `[k:u32 chunk count][original_len:u32][auth_tag:16B]`, itself sent as a
/// single `Hdr` chunk (it always fits in [`CHUNK_SIZE`]).
#[derive(Clone, Copy)]
struct Header {
    k: u32,
    original_len: u32,
    auth_tag: [u8; 16],
}

impl Header {
    fn encode(&self) -> [u8; CHUNK_SIZE] {
        let mut out = [0u8; CHUNK_SIZE];
        out[0..4].copy_from_slice(&self.k.to_be_bytes());
        out[4..8].copy_from_slice(&self.original_len.to_be_bytes());
        out[8..24].copy_from_slice(&self.auth_tag);
        out
    }

    fn decode(bytes: &[u8; CHUNK_SIZE]) -> Self {
        let mut k = [0u8; 4];
        let mut len = [0u8; 4];
        let mut auth_tag = [0u8; 16];
        k.copy_from_slice(&bytes[0..4]);
        len.copy_from_slice(&bytes[4..8]);
        auth_tag.copy_from_slice(&bytes[8..24]);
        Header {
            k: u32::from_be_bytes(k),
            original_len: u32::from_be_bytes(len),
            auth_tag,
        }
    }
}

/// §4.6.2 `send_ek` role states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendEkState {
    KeysUnsampled,
    KeysSampled,
    HeaderSent,
    Ct1Received,
    EkSent,
    EkSentCt1Received,
}

/// The `send_ek` side: samples an ML-KEM keypair, ships its encapsulation
/// key in chunks, and decapsulates the ciphertext it receives back.
#[derive(Clone)]
pub struct SendEkMachine {
    state: SendEkState,
    decapsulation_key: Option<Vec<u8>>,
    ek_encoder: Option<PolyEncoder>,
    header: Option<Header>,
    ct1_decoder: Option<PolyDecoder>,
    ct2_decoder: Option<PolyDecoder>,
}

impl SendEkMachine {
    pub fn new() -> Self {
        SendEkMachine {
            state: SendEkState::KeysUnsampled,
            decapsulation_key: None,
            ek_encoder: None,
            header: None,
            ct1_decoder: None,
            ct2_decoder: None,
        }
    }

    pub fn state(&self) -> SendEkState {
        self.state
    }

    /// `KeysUnsampled -> KeysSampled`: sample a fresh ML-KEM keypair for this
    /// epoch and prepare the header + encapsulation-key chunks to send.
    pub fn begin_epoch(&mut self, auth: &Authenticator) -> Result<()> {
        if self.state != SendEkState::KeysUnsampled {
            return Err(RatchetError::InvalidSession(
                "send_ek: begin_epoch called out of state".to_string(),
            ));
        }
        let keypair = kem::generate();
        let encoder = PolyEncoder::new(&keypair.encapsulation_key);
        let header = Header {
            k: encoder.k() as u32,
            original_len: encoder.original_len() as u32,
            auth_tag: auth.tag(&keypair.encapsulation_key),
        };
        self.decapsulation_key = Some(keypair.decapsulation_key().to_vec());
        self.ek_encoder = Some(encoder);
        self.header = Some(header);
        self.state = SendEkState::KeysSampled;
        Ok(())
    }

    /// The single `Hdr` message to send once `KeysSampled`.
    pub fn header_message(&self, epoch: u64, index: u32) -> Result<SpqrMessage> {
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSession("send_ek: no header yet".to_string()))?;
        Ok(SpqrMessage {
            epoch,
            index,
            msg_type: MsgType::Hdr(Chunk {
                chunk_index: 1,
                chunk_data: header.encode(),
            }),
        })
    }

    /// `KeysSampled -> HeaderSent` once the header has gone out.
    pub fn mark_header_sent(&mut self) {
        if self.state == SendEkState::KeysSampled {
            self.state = SendEkState::HeaderSent;
        }
    }

    /// Number of `Ek` chunks this epoch's encapsulation key was split into,
    /// once [`Self::begin_epoch`] has sampled it.
    pub fn ek_chunk_count(&self) -> Option<u32> {
        self.ek_encoder.as_ref().map(|e| e.k() as u32)
    }

    /// One `Ek` chunk message, 1-indexed.
    pub fn ek_chunk_message(&self, chunk_index: u32, epoch: u64, index: u32) -> Result<SpqrMessage> {
        let encoder = self
            .ek_encoder
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSession("send_ek: no encoder yet".to_string()))?;
        Ok(SpqrMessage {
            epoch,
            index,
            msg_type: MsgType::Ek(Chunk {
                chunk_index,
                chunk_data: encoder.chunk(chunk_index)?,
            }),
        })
    }

    pub fn mark_ek_sent(&mut self) {
        if matches!(self.state, SendEkState::HeaderSent) {
            self.state = SendEkState::EkSent;
        }
    }

    /// Feed an inbound `Ct1` chunk (the placeholder phase-1 ciphertext, per
    /// the §9 open question — its content is never used). Returns `true` once
    /// every chunk has arrived, the signal for the caller to send a `Ct1Ack`.
    pub fn on_ct1_chunk(&mut self, chunk: &Chunk) -> bool {
        let decoder = self
            .ct1_decoder
            .get_or_insert_with(|| PolyDecoder::new(CT_CHUNKS, kem::CT_BYTES));
        let _ = decoder.add_chunk(chunk.chunk_index, &chunk.chunk_data);
        if self.state == SendEkState::HeaderSent || self.state == SendEkState::EkSent {
            self.state = if self.state == SendEkState::EkSent {
                SendEkState::EkSentCt1Received
            } else {
                SendEkState::Ct1Received
            };
        }
        decoder.have_enough()
    }

    /// Feed an inbound `Ct2` chunk (the real ciphertext). Once enough chunks
    /// have arrived this decapsulates and yields the epoch secret — "for the
    /// sender-of-ek, at the `Ct2` completion" (§4.6.2).
    pub fn on_ct2_chunk(&mut self, chunk: &Chunk) -> Result<Option<EpochSecret>> {
        let decoder = self
            .ct2_decoder
            .get_or_insert_with(|| PolyDecoder::new(CT_CHUNKS, kem::CT_BYTES));
        decoder.add_chunk(chunk.chunk_index, &chunk.chunk_data)?;
        if !decoder.have_enough() {
            return Ok(None);
        }
        let ciphertext = decoder.decode()?;
        let dk = self
            .decapsulation_key
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSession("send_ek: no decapsulation key".to_string()))?;
        let secret = kem::decapsulate(dk, &ciphertext)?;
        self.reset_for_next_epoch();
        Ok(Some(secret))
    }

    fn reset_for_next_epoch(&mut self) {
        self.state = SendEkState::KeysUnsampled;
        self.decapsulation_key = None;
        self.ek_encoder = None;
        self.header = None;
        self.ct1_decoder = None;
        self.ct2_decoder = None;
    }
}

impl Default for SendEkMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.6.2 `send_ct` role states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendCtState {
    NoHeaderReceived,
    HeaderReceived,
    Ct1Sampled,
    EkReceivedCt1Sampled,
    Ct1Acknowledged,
    Ct2Sampled,
}

/// The `send_ct` side: receives the peer's chunked encapsulation key,
/// encapsulates against it once fully reassembled, and ships the
/// (placeholder `Ct1`, real `Ct2`) ciphertext chunk pair back.
#[derive(Clone)]
pub struct SendCtMachine {
    state: SendCtState,
    header: Option<Header>,
    ek_decoder: Option<PolyDecoder>,
    ct2_encoder: Option<PolyEncoder>,
}

impl SendCtMachine {
    pub fn new() -> Self {
        SendCtMachine {
            state: SendCtState::NoHeaderReceived,
            header: None,
            ek_decoder: None,
            ct2_encoder: None,
        }
    }

    pub fn state(&self) -> SendCtState {
        self.state
    }

    /// `NoHeaderReceived -> HeaderReceived`: consume the single `Hdr` chunk.
    pub fn on_header(&mut self, chunk: &Chunk) -> Result<()> {
        if self.state != SendCtState::NoHeaderReceived {
            return Ok(()); // retransmitted header; already past this point.
        }
        let header = Header::decode(&chunk.chunk_data);
        self.ek_decoder = Some(PolyDecoder::new(
            header.k as usize,
            header.original_len as usize,
        ));
        self.header = Some(header);
        self.state = SendCtState::HeaderReceived;
        Ok(())
    }

    /// Feed an inbound `Ek` chunk. Once the encapsulation key is fully
    /// reassembled, verify it against the header's authenticator tag,
    /// encapsulate, and yield the epoch secret immediately — "for the
    /// sender-of-ct, at `HeaderReceived -> Ct1Sampled`" (§4.6.2).
    pub fn on_ek_chunk(&mut self, chunk: &Chunk, auth: &Authenticator) -> Result<Option<EpochSecret>> {
        let header = self
            .header
            .ok_or_else(|| RatchetError::InvalidSession("send_ct: header not yet received".to_string()))?;
        let decoder = self
            .ek_decoder
            .as_mut()
            .ok_or_else(|| RatchetError::InvalidSession("send_ct: no ek decoder".to_string()))?;
        decoder.add_chunk(chunk.chunk_index, &chunk.chunk_data)?;
        if !decoder.have_enough() {
            return Ok(None);
        }
        let ek_bytes = decoder.decode()?;
        auth.verify(&ek_bytes, &header.auth_tag)?;

        let (ciphertext, secret) = kem::encapsulate(&ek_bytes)?;
        self.ct2_encoder = Some(PolyEncoder::new(&ciphertext));
        self.state = SendCtState::Ct1Sampled;
        Ok(Some(secret))
    }

    /// The placeholder phase-1 chunk set (§9: all-zero `Ct1` emulation).
    /// `k` matches the real ciphertext's chunk count so the peer's decoder
    /// sizing lines up even though the content carries no information.
    pub fn ct1_chunk_message(&self, chunk_index: u32, epoch: u64, index: u32) -> Result<SpqrMessage> {
        if self.state != SendCtState::Ct1Sampled && self.state != SendCtState::EkReceivedCt1Sampled {
            return Err(RatchetError::InvalidSession(
                "send_ct: ct1 requested out of state".to_string(),
            ));
        }
        Ok(SpqrMessage {
            epoch,
            index,
            msg_type: MsgType::Ct1(Chunk {
                chunk_index,
                chunk_data: [0u8; CHUNK_SIZE],
            }),
        })
    }

    /// `Ct1Sampled -> Ct1Acknowledged` (or `EkReceivedCt1Sampled` if the
    /// peer's ack arrived folded with the ek-receipt ack).
    pub fn on_ct1_ack(&mut self) {
        self.state = match self.state {
            SendCtState::Ct1Sampled => SendCtState::Ct1Acknowledged,
            other => other,
        };
    }

    pub fn on_ek_ct1_ack(&mut self) {
        self.state = match self.state {
            SendCtState::Ct1Sampled => SendCtState::EkReceivedCt1Sampled,
            other => other,
        };
    }

    /// The real ciphertext, chunked, 1-indexed.
    pub fn ct2_chunk_message(&self, chunk_index: u32, epoch: u64, index: u32) -> Result<SpqrMessage> {
        let encoder = self
            .ct2_encoder
            .as_ref()
            .ok_or_else(|| RatchetError::InvalidSession("send_ct: ciphertext not sampled".to_string()))?;
        Ok(SpqrMessage {
            epoch,
            index,
            msg_type: MsgType::Ct2(Chunk {
                chunk_index,
                chunk_data: encoder.chunk(chunk_index)?,
            }),
        })
    }

    /// All `Ct2` chunks are on the wire: `Ct2Sampled`, then the next epoch's
    /// `KeysUnsampled` (§4.6.2: "`Ct2Sampled` → next-epoch `KeysUnsampled`").
    pub fn mark_ct2_sent(&mut self) {
        self.state = SendCtState::Ct2Sampled;
    }

    /// Roll over to the next epoch once the local side is done with this one.
    pub fn reset_for_next_epoch(&mut self) {
        self.state = SendCtState::NoHeaderReceived;
        self.header = None;
        self.ek_decoder = None;
        self.ct2_encoder = None;
    }
}

impl Default for SendCtMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_pair() -> (Authenticator, Authenticator) {
        let root = [0x11u8; 32];
        let mac = [0x22u8; 32];
        (Authenticator::derive(&root, &mac), Authenticator::derive(&root, &mac))
    }

    /// End-to-end single-epoch exchange: send_ek ships its key in chunks,
    /// send_ct reassembles, encapsulates, ships ciphertext back in two
    /// phases; both sides land on the same epoch secret.
    #[test]
    fn full_epoch_exchange_yields_matching_secret() {
        let (auth_ek_side, auth_ct_side) = auth_pair();
        let mut ek_machine = SendEkMachine::new();
        let mut ct_machine = SendCtMachine::new();

        ek_machine.begin_epoch(&auth_ek_side).unwrap();
        let hdr_msg = ek_machine.header_message(1, 0).unwrap();
        ek_machine.mark_header_sent();

        let hdr_chunk = match hdr_msg.msg_type {
            MsgType::Hdr(c) => c,
            _ => panic!("expected Hdr"),
        };
        ct_machine.on_header(&hdr_chunk).unwrap();
        assert_eq!(ct_machine.state(), SendCtState::HeaderReceived);

        let k = ek_machine.ek_encoder.as_ref().unwrap().k();
        let mut ct_epoch_secret = None;
        for idx in 1..=k as u32 {
            let msg = ek_machine.ek_chunk_message(idx, 1, idx).unwrap();
            let chunk = match msg.msg_type {
                MsgType::Ek(c) => c,
                _ => panic!("expected Ek"),
            };
            if let Some(secret) = ct_machine.on_ek_chunk(&chunk, &auth_ct_side).unwrap() {
                ct_epoch_secret = Some(secret);
            }
        }
        ek_machine.mark_ek_sent();
        let ct_epoch_secret = ct_epoch_secret.expect("ct side should have produced a secret");
        assert_eq!(ct_machine.state(), SendCtState::Ct1Sampled);

        // Placeholder Ct1 phase (content ignored; chunk count is the fixed
        // `CT_CHUNKS` constant both sides already know).
        for idx in 1..=CT_CHUNKS as u32 {
            let msg = ct_machine.ct1_chunk_message(idx, 1, idx).unwrap();
            let chunk = match msg.msg_type {
                MsgType::Ct1(c) => c,
                _ => panic!("expected Ct1"),
            };
            ek_machine.on_ct1_chunk(&chunk);
        }
        ct_machine.on_ct1_ack();
        assert_eq!(ct_machine.state(), SendCtState::Ct1Acknowledged);

        let mut ek_epoch_secret = None;
        for idx in 1..=CT_CHUNKS as u32 {
            let msg = ct_machine.ct2_chunk_message(idx, 1, idx).unwrap();
            let chunk = match msg.msg_type {
                MsgType::Ct2(c) => c,
                _ => panic!("expected Ct2"),
            };
            if let Some(secret) = ek_machine.on_ct2_chunk(&chunk).unwrap() {
                ek_epoch_secret = Some(secret);
            }
        }
        ct_machine.mark_ct2_sent();

        let ek_epoch_secret = ek_epoch_secret.expect("ek side should have produced a secret");
        assert_eq!(ek_epoch_secret, ct_epoch_secret);
        assert_eq!(ek_machine.state(), SendEkState::KeysUnsampled);
        assert_eq!(ct_machine.state(), SendCtState::Ct2Sampled);
    }

    #[test]
    fn tampered_ek_bytes_fail_authentication() {
        let (auth_ek_side, auth_ct_side) = auth_pair();
        let mut ek_machine = SendEkMachine::new();
        let mut ct_machine = SendCtMachine::new();

        ek_machine.begin_epoch(&auth_ek_side).unwrap();
        let hdr_msg = ek_machine.header_message(1, 0).unwrap();
        let hdr_chunk = match hdr_msg.msg_type {
            MsgType::Hdr(c) => c,
            _ => unreachable!(),
        };
        ct_machine.on_header(&hdr_chunk).unwrap();

        let k = ek_machine.ek_encoder.as_ref().unwrap().k();
        let mut saw_err = false;
        for idx in 1..=k as u32 {
            let msg = ek_machine.ek_chunk_message(idx, 1, idx).unwrap();
            let mut chunk = match msg.msg_type {
                MsgType::Ek(c) => c,
                _ => unreachable!(),
            };
            chunk.chunk_data[0] ^= 0xFF; // tamper
            if ct_machine.on_ek_chunk(&chunk, &auth_ct_side).is_err() {
                saw_err = true;
                break;
            }
        }
        assert!(saw_err, "tampering should trip the authenticator");
    }
}
