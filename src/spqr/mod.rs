//! Layer L6 — the SPQR (Signal Post-Quantum Ratchet) epoch engine (§4.6).
//!
//! [`chain`] holds the symmetric per-epoch directional chains and their
//! out-of-order key history; [`poly`] is the GF(2^16) erasure coding under
//! the chunk transport; [`message`] is the SPQR wire frame; [`kem_state`] is
//! the chunked ML-KEM handshake that refreshes the epoch secret. This module
//! composes all four into [`SpqrSession`], one per Triple Ratchet session,
//! which a session cipher consults on each ratchet step (§4.6.3).

pub mod chain;
pub mod kem_state;
pub mod message;
pub mod poly;

use crate::error::{RatchetError, Result};
use chain::{Chain, Direction, EpochClass};
use kem_state::{Authenticator, EpochSecret, SendCtMachine, SendEkMachine};
use message::{MsgType, SpqrMessage};

/// Which chunked-KEM role this side currently plays for the epoch in
/// progress (§4.6.2: "Two peers alternate roles per epoch").
#[derive(Clone)]
enum Role {
    SendEk(SendEkMachine),
    SendCt(SendCtMachine),
}

/// One session's SPQR state: the symmetric [`Chain`] plus whichever chunked
/// ML-KEM machine this side is currently running, plus any reply chunks
/// still waiting to be piggybacked on an outbound `SignalMessage`'s
/// `pq_ratchet` field. `initial_role` is fixed at construction (mirroring
/// `Chain`'s `Direction`); the role alternates each time an epoch secret is
/// produced, since the side that just finished `send_ct` becomes `send_ek`
/// for the following epoch and vice versa.
#[derive(Clone)]
pub struct SpqrSession {
    chain: Chain,
    role: Role,
    pending_outbound: Vec<SpqrMessage>,
}

impl SpqrSession {
    /// Construct from the initial shared secret established by the outer
    /// handshake (§4.2) and this side's direction and starting role.
    /// Conventionally the initiator starts as `send_ek` and the responder as
    /// `send_ct`, so the first epoch's header has somewhere to come from.
    pub fn new(initial_shared_secret: &[u8; 32], direction: Direction, initiator: bool) -> Self {
        let chain = Chain::bootstrap(initial_shared_secret, direction);
        let role = if initiator {
            Role::SendEk(SendEkMachine::new())
        } else {
            Role::SendCt(SendCtMachine::new())
        };
        SpqrSession {
            chain,
            role,
            pending_outbound: Vec::new(),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.chain.current_epoch
    }

    /// The per-epoch header authenticator, derived from the outer root key
    /// and this chain's current send-direction MAC key material (§4.6.2
    /// "Authentication"). Callers derive the authenticator fresh for each
    /// epoch transition since both inputs change per epoch.
    pub fn authenticator(&mut self, root_key: &[u8; 32], epoch: u64) -> Result<Authenticator> {
        let (_, mac_key) = self.chain.send_key(epoch)?;
        Ok(Authenticator::derive(root_key, &mac_key))
    }

    /// Encrypt a symmetric-chain message key for `counter` in the chain's
    /// current recv/send direction — exposed so an integrator can fold SPQR
    /// chain-advance material into application data if desired. Most
    /// integrators only need [`Self::take_epoch_secret`]; this is here for
    /// completeness with §4.6.1's per-message chain advance.
    pub fn send_symmetric_key(&mut self) -> Result<(u32, [u8; 32])> {
        self.chain.send_key(self.chain.send_epoch)
    }

    pub fn recv_symmetric_key(&mut self, epoch: u64, index: u32) -> Result<[u8; 32]> {
        self.chain.recv_key(epoch, index)
    }

    /// Drive one inbound SPQR wire message through epoch validation (§4.6.2)
    /// and the active role's state machine, queueing any reply chunks onto
    /// [`Self::take_outbound`]. Returns a freshly produced epoch secret, if
    /// this message completed one — the caller mixes it into the outer root
    /// key via [`crate::keys::RootKey::mix_epoch_secret`] (§4.6.3).
    pub fn handle_inbound(
        &mut self,
        root_key: &[u8; 32],
        msg: &SpqrMessage,
    ) -> Result<Option<EpochSecret>> {
        let (outbound, secret) = match self.chain.classify_epoch(msg.epoch) {
            EpochClass::Invalid => Err(RatchetError::InvalidMessage(
                "SPQR epoch must be nonzero".to_string(),
            )),
            EpochClass::Stale => {
                log::trace!(
                    "SPQR: dropping stale message at epoch {} (current {})",
                    msg.epoch,
                    self.chain.current_epoch
                );
                Ok((Vec::new(), None)) // drop silently, §4.6.2
            }
            EpochClass::OutOfRange => {
                log::warn!(
                    "SPQR: message epoch {} out of range of current epoch {}",
                    msg.epoch,
                    self.chain.current_epoch
                );
                Err(RatchetError::EpochOutOfRange(format!(
                    "message epoch {} out of range of current epoch {}",
                    msg.epoch, self.chain.current_epoch
                )))
            }
            EpochClass::Current | EpochClass::Next => {
                if matches!(self.chain.classify_epoch(msg.epoch), EpochClass::Next) {
                    self.roll_to_next_epoch()?;
                }
                self.dispatch(root_key, msg)
            }
        }?;
        self.pending_outbound.extend(outbound);
        if let Some(s) = &secret {
            // The chunked ML-KEM round just completed: fold the fresh epoch
            // secret into the chain's own epoch counter (§4.6.1 `addEpoch`)
            // so `current_epoch`/`send_epoch` actually advance alongside the
            // outer root key this secret is about to be mixed into.
            self.chain.add_epoch(s)?;
            self.chain.advance_send_epoch();
            log::debug!(
                "SPQR: epoch secret produced, chain advanced to epoch {}",
                self.chain.current_epoch
            );
        }
        Ok(secret)
    }

    /// Decode and drive an inbound `pq_ratchet` payload (§4.6.3 integration
    /// point: the outer session cipher calls this once per received
    /// `SignalMessage` that carries one).
    pub fn handle_inbound_bytes(
        &mut self,
        root_key: &[u8; 32],
        bytes: &[u8],
    ) -> Result<Option<EpochSecret>> {
        let (msg, _) = SpqrMessage::decode(bytes)?;
        self.handle_inbound(root_key, &msg)
    }

    /// Queue the first epoch's `Hdr`/`Ek` chunks without waiting for an
    /// inbound message to trigger them. The `send_ek` side otherwise only
    /// begins an epoch from inside [`Self::dispatch`], which requires an
    /// inbound message to call it from — on the very first epoch there isn't
    /// one yet, so the handshake builder calls this once right after
    /// constructing an initiator-role session (§4.6.2: "the side starting as
    /// `send_ek` begins the epoch"). A no-op for a `send_ct`-role session.
    pub fn kickoff(&mut self, root_key: &[u8; 32]) -> Result<()> {
        if let Role::SendEk(ek) = &mut self.role {
            if ek.state() == kem_state::SendEkState::KeysUnsampled {
                let epoch = self.chain.current_epoch;
                let auth = Authenticator::derive(root_key, &[0u8; 32]);
                ek.begin_epoch(&auth)?;
                self.pending_outbound.push(ek.header_message(epoch, 0)?);
                ek.mark_header_sent();
                let k = ek
                    .ek_chunk_count()
                    .ok_or_else(|| RatchetError::InvalidSession("send_ek: no encoder".into()))?;
                for idx in 1..=k {
                    self.pending_outbound
                        .push(ek.ek_chunk_message(idx, epoch, idx)?);
                }
                ek.mark_ek_sent();
            }
        }
        Ok(())
    }

    /// The next queued outbound SPQR wire message, if any, encoded and ready
    /// to attach to an outgoing `SignalMessage`'s `pq_ratchet` field.
    pub fn take_outbound_bytes(&mut self) -> Option<Vec<u8>> {
        let msg = self.pending_outbound.first()?.clone();
        let encoded = msg.encode().ok()?;
        self.pending_outbound.remove(0);
        Some(encoded)
    }

    fn roll_to_next_epoch(&mut self) -> Result<()> {
        // The chain's own epoch counter only advances once an epoch secret
        // is mixed in (`Chain::add_epoch`); arriving here means the peer has
        // already moved on, so the local role machine resets to track a
        // fresh epoch even though `chain.current_epoch` catches up only once
        // `add_epoch` runs with the secret this exchange produces.
        self.role = match std::mem::replace(&mut self.role, Role::SendEk(SendEkMachine::new())) {
            Role::SendEk(_) => Role::SendCt(SendCtMachine::new()),
            Role::SendCt(_) => Role::SendEk(SendEkMachine::new()),
        };
        Ok(())
    }

    fn dispatch(
        &mut self,
        root_key: &[u8; 32],
        msg: &SpqrMessage,
    ) -> Result<(Vec<SpqrMessage>, Option<EpochSecret>)> {
        let epoch = msg.epoch;
        match &mut self.role {
            Role::SendEk(ek) => {
                let mut outbound = Vec::new();
                let mut secret = None;
                match &msg.msg_type {
                    MsgType::None => {}
                    MsgType::Ct1(chunk) => {
                        if ek.on_ct1_chunk(chunk) {
                            outbound.push(ct1_ack(epoch, 0));
                        }
                    }
                    MsgType::Ct2(chunk) => {
                        if let Some(s) = ek.on_ct2_chunk(chunk)? {
                            secret = Some(s);
                        }
                    }
                    other => {
                        return Err(RatchetError::InvalidMessage(format!(
                            "send_ek role received unexpected SPQR message {other:?}"
                        )))
                    }
                }
                if ek.state() == kem_state::SendEkState::KeysUnsampled {
                    let auth = Authenticator::derive(root_key, &[0u8; 32]);
                    ek.begin_epoch(&auth)?;
                    outbound.push(ek.header_message(epoch, 0)?);
                    ek.mark_header_sent();
                    let k = ek
                        .ek_chunk_count()
                        .ok_or_else(|| RatchetError::InvalidSession("send_ek: no encoder".into()))?;
                    for idx in 1..=k {
                        outbound.push(ek.ek_chunk_message(idx, epoch, idx)?);
                    }
                    ek.mark_ek_sent();
                }
                Ok((outbound, secret))
            }
            Role::SendCt(ct) => {
                let mut outbound = Vec::new();
                let mut secret = None;
                match &msg.msg_type {
                    MsgType::None => {}
                    MsgType::Hdr(chunk) => ct.on_header(chunk)?,
                    MsgType::Ek(chunk) => {
                        let auth = Authenticator::derive(root_key, &[0u8; 32]);
                        if let Some(s) = ct.on_ek_chunk(chunk, &auth)? {
                            secret = Some(s);
                            for idx in 1..=kem_state::CT_CHUNKS as u32 {
                                outbound.push(ct.ct1_chunk_message(idx, epoch, idx)?);
                            }
                        }
                    }
                    MsgType::Ct1Ack => {
                        ct.on_ct1_ack();
                        for idx in 1..=kem_state::CT_CHUNKS as u32 {
                            outbound.push(ct.ct2_chunk_message(idx, epoch, idx)?);
                        }
                        ct.mark_ct2_sent();
                    }
                    MsgType::EkCt1Ack(_) => ct.on_ek_ct1_ack(),
                    other => {
                        return Err(RatchetError::InvalidMessage(format!(
                            "send_ct role received unexpected SPQR message {other:?}"
                        )))
                    }
                }
                Ok((outbound, secret))
            }
        }
    }
}

/// `epoch == 0` is invalid everywhere; re-export so callers validating
/// before construction don't need to reach into `message`.
pub fn is_valid_epoch(epoch: u64) -> bool {
    epoch != 0
}

/// Builds a `Ct1Ack` reply, the common "I received your placeholder Ct1,
/// continue" acknowledgement with no payload (§6: "no trailing zero length").
pub fn ct1_ack(epoch: u64, index: u32) -> SpqrMessage {
    SpqrMessage {
        epoch,
        index,
        msg_type: MsgType::Ct1Ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_valid_epoch_rejects_zero() {
        assert!(!is_valid_epoch(0));
        assert!(is_valid_epoch(1));
    }

    #[test]
    fn ct1_ack_has_no_payload() {
        let msg = ct1_ack(3, 1);
        assert!(matches!(msg.msg_type, MsgType::Ct1Ack));
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.last(), Some(&0x04));
    }

    /// Full epoch exchange driven through the public `SpqrSession` API (not
    /// the raw state machines directly, unlike `kem_state`'s test): both
    /// sides land on the same epoch secret and both chains advance to epoch
    /// 2, confirming `kickoff` actually starts the exchange and
    /// `handle_inbound` actually folds the result into `Chain::add_epoch`.
    #[test]
    fn full_session_epoch_exchange_advances_both_chains() {
        let root_key = [0x42u8; 32];
        let shared = [0x77u8; 32];

        let mut alice = SpqrSession::new(&shared, Direction::A2B, true);
        let mut bob = SpqrSession::new(&shared, Direction::B2A, false);
        alice.kickoff(&root_key).unwrap();

        let mut alice_secret = None;
        let mut bob_secret = None;
        let mut alice_to_bob = true;
        for _ in 0..8 {
            if alice_to_bob {
                while let Some(bytes) = alice.take_outbound_bytes() {
                    if let Some(s) = bob.handle_inbound_bytes(&root_key, &bytes).unwrap() {
                        bob_secret = Some(s);
                    }
                }
            } else {
                while let Some(bytes) = bob.take_outbound_bytes() {
                    if let Some(s) = alice.handle_inbound_bytes(&root_key, &bytes).unwrap() {
                        alice_secret = Some(s);
                    }
                }
            }
            alice_to_bob = !alice_to_bob;
            if alice_secret.is_some()
                && bob_secret.is_some()
                && alice.pending_outbound.is_empty()
                && bob.pending_outbound.is_empty()
            {
                break;
            }
        }

        assert_eq!(alice_secret, bob_secret);
        assert_eq!(alice.current_epoch(), 2);
        assert_eq!(bob.current_epoch(), 2);
    }
}
