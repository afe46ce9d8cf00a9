//! SPQR directional chains and their out-of-order key history (§4.6.1).
//!
//! Grounded on [`crate::keys::ChainKey`]'s advance-and-derive shape — a
//! directional chain here is the same "HKDF seed evolves, each step also
//! yields a one-shot output" pattern, just with SPQR's own info labels and a
//! bounded `KeyHistory` standing in for the Double Ratchet's per-chain
//! `MAX_MESSAGE_KEYS` cache.

use std::collections::BTreeMap;

use crate::error::{RatchetError, Result};
use crate::primitives::kdf::hkdf_sha256;
use crate::MAX_OOO_KEYS;

const CHAIN_NEXT_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Next";
const CHAIN_START_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain  Start";
const CHAIN_ADD_EPOCH_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Add Epoch";

/// Which side of the pair this endpoint plays for a given epoch's two
/// directional sub-chains.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    A2B,
    B2A,
}

/// Bounded out-of-order key cache for one directional chain (§4.6.1: "GC
/// trims keys with `index + MAX_OOO_KEYS < currentCtr`").
#[derive(Clone, Default)]
pub struct KeyHistory {
    keys: BTreeMap<u32, [u8; 32]>,
    consumed: BTreeMap<u32, ()>,
}

impl KeyHistory {
    fn insert(&mut self, index: u32, key: [u8; 32]) {
        self.keys.insert(index, key);
    }

    fn gc(&mut self, current_ctr: u32) {
        let floor = current_ctr.saturating_sub(MAX_OOO_KEYS);
        self.keys.retain(|&idx, _| idx >= floor);
        self.consumed.retain(|&idx, _| idx >= floor);
    }

    /// Take and consume a previously cached key, or classify why it's absent.
    fn take(&mut self, index: u32, current_ctr: u32) -> Result<Option<[u8; 32]>> {
        if let Some(key) = self.keys.remove(&index) {
            self.consumed.insert(index, ());
            return Ok(Some(key));
        }
        if self.consumed.contains_key(&index) {
            return Err(RatchetError::KeyAlreadyRequested);
        }
        if index < current_ctr.saturating_sub(MAX_OOO_KEYS) {
            return Err(RatchetError::KeyTrimmed);
        }
        Ok(None)
    }
}

/// One directional symmetric chain: a 32-byte evolving seed plus its next
/// counter and out-of-order history.
#[derive(Clone)]
pub struct DirectionalChain {
    next: [u8; 32],
    ctr: u32,
    history: KeyHistory,
}

impl DirectionalChain {
    fn new(seed: [u8; 32]) -> Self {
        DirectionalChain {
            next: seed,
            ctr: 0,
            history: KeyHistory::default(),
        }
    }

    /// Advance by exactly one step, returning the key at the now-consumed
    /// counter. Always moves `ctr` forward by one.
    fn advance_once(&mut self) -> [u8; 32] {
        let mut info = Vec::with_capacity(CHAIN_NEXT_INFO.len() + 4);
        info.extend_from_slice(CHAIN_NEXT_INFO);
        info.extend_from_slice(&self.ctr.to_be_bytes());
        let okm = hkdf_sha256(&[0u8; 32], &self.next, &info, 64);
        let mut new_next = [0u8; 32];
        let mut key = [0u8; 32];
        new_next.copy_from_slice(&okm[..32]);
        key.copy_from_slice(&okm[32..]);
        self.next = new_next;
        self.ctr += 1;
        key
    }

    /// Produce the key for `index`, either from the out-of-order cache, by
    /// advancing exactly one step (the common case, `index == ctr`), or by
    /// advancing ahead and caching the skipped keys (`index > ctr`).
    pub fn key_at(&mut self, index: u32) -> Result<[u8; 32]> {
        if let Some(key) = self.history.take(index, self.ctr)? {
            return Ok(key);
        }
        if index < self.ctr {
            // Not in history and not trimmed/consumed: it was never issued.
            return Err(RatchetError::KeyAlreadyRequested);
        }
        let gap = index - self.ctr;
        if gap > crate::MAX_JUMP {
            return Err(RatchetError::KeyJump {
                requested: gap as u64,
                max: crate::MAX_JUMP as u64,
            });
        }
        let mut result = None;
        while self.ctr <= index {
            let issued_at = self.ctr;
            let key = self.advance_once();
            if issued_at == index {
                result = Some(key);
            } else {
                self.history.insert(issued_at, key);
            }
        }
        self.history.gc(self.ctr);
        result.ok_or_else(|| RatchetError::InvalidSession("SPQR chain derivation failed".into()))
    }

    /// Advance the sending side by one, always producing a fresh key (no
    /// cache lookup — a sender never re-requests an index).
    pub fn send_next(&mut self) -> (u32, [u8; 32]) {
        let index = self.ctr;
        let key = self.advance_once();
        (index, key)
    }
}

/// One epoch's pair of directional chains, seeded from a bootstrap secret
/// (epoch 1) or an `addEpoch` mix (epoch N+1).
#[derive(Clone)]
pub struct EpochChains {
    pub epoch: u64,
    pub send: DirectionalChain,
    pub recv: DirectionalChain,
}

/// The SPQR chain engine for one session direction: tracks the current and
/// send epochs and the bounded window of epochs kept around them (§4.6.1).
#[derive(Clone)]
pub struct Chain {
    direction: Direction,
    pub current_epoch: u64,
    pub send_epoch: u64,
    epochs: Vec<EpochChains>,
    next_root: [u8; 32],
}

impl Chain {
    /// §4.6.1 bootstrap: derive `nextRoot`, the A2B seed, and the B2A seed
    /// from the initial shared secret, and install epoch 1 (epoch 0 is never
    /// valid on the wire, §6).
    pub fn bootstrap(initial_shared_secret: &[u8; 32], direction: Direction) -> Chain {
        let okm = hkdf_sha256(&[0u8; 32], initial_shared_secret, CHAIN_START_INFO, 96);
        let mut next_root = [0u8; 32];
        let mut a2b_seed = [0u8; 32];
        let mut b2a_seed = [0u8; 32];
        next_root.copy_from_slice(&okm[0..32]);
        a2b_seed.copy_from_slice(&okm[32..64]);
        b2a_seed.copy_from_slice(&okm[64..96]);

        let (send_seed, recv_seed) = match direction {
            Direction::A2B => (a2b_seed, b2a_seed),
            Direction::B2A => (b2a_seed, a2b_seed),
        };

        Chain {
            direction,
            current_epoch: 1,
            send_epoch: 1,
            epochs: vec![EpochChains {
                epoch: 1,
                send: DirectionalChain::new(send_seed),
                recv: DirectionalChain::new(recv_seed),
            }],
            next_root,
        }
    }

    fn epoch_mut(&mut self, epoch: u64) -> Result<&mut EpochChains> {
        self.epochs
            .iter_mut()
            .find(|e| e.epoch == epoch)
            .ok_or_else(|| RatchetError::EpochOutOfRange(format!("epoch {epoch} not retained")))
    }

    /// Validate an inbound message's epoch against the local state (§4.6.2):
    /// strictly less than current is stale (caller should drop), equal
    /// dispatches against the current epoch, current+1 begins the next
    /// epoch transition, anything else is out of range.
    pub fn classify_epoch(&self, msg_epoch: u64) -> EpochClass {
        if msg_epoch == 0 {
            return EpochClass::Invalid;
        }
        if msg_epoch < self.current_epoch {
            EpochClass::Stale
        } else if msg_epoch == self.current_epoch {
            EpochClass::Current
        } else if msg_epoch == self.current_epoch + 1 {
            EpochClass::Next
        } else {
            EpochClass::OutOfRange
        }
    }

    /// §4.6.1 `addEpoch`: mixes a fresh epoch secret into `next_root` and
    /// installs a new pair of directional chains one epoch ahead of
    /// `current_epoch`, then prunes epochs older than
    /// `EPOCHS_TO_KEEP_PRIOR_TO_SEND_EPOCH` below `send_epoch`.
    pub fn add_epoch(&mut self, epoch_secret: &[u8; 32]) -> Result<()> {
        let new_epoch = self.current_epoch + 1;
        let okm = hkdf_sha256(&self.next_root, epoch_secret, CHAIN_ADD_EPOCH_INFO, 96);
        let mut next_root = [0u8; 32];
        let mut a2b_seed = [0u8; 32];
        let mut b2a_seed = [0u8; 32];
        next_root.copy_from_slice(&okm[0..32]);
        a2b_seed.copy_from_slice(&okm[32..64]);
        b2a_seed.copy_from_slice(&okm[64..96]);

        let (send_seed, recv_seed) = match self.direction {
            Direction::A2B => (a2b_seed, b2a_seed),
            Direction::B2A => (b2a_seed, a2b_seed),
        };

        self.next_root = next_root;
        self.current_epoch = new_epoch;
        self.epochs.push(EpochChains {
            epoch: new_epoch,
            send: DirectionalChain::new(send_seed),
            recv: DirectionalChain::new(recv_seed),
        });
        self.prune();
        Ok(())
    }

    /// Advance `send_epoch` to `current_epoch` (called once the local side
    /// has actually started sending in the new epoch), then prune.
    pub fn advance_send_epoch(&mut self) {
        self.send_epoch = self.current_epoch;
        self.prune();
    }

    fn prune(&mut self) {
        let floor = self
            .send_epoch
            .saturating_sub(crate::EPOCHS_TO_KEEP_PRIOR_TO_SEND_EPOCH);
        self.epochs.retain(|e| e.epoch >= floor);
    }

    pub fn recv_key(&mut self, epoch: u64, index: u32) -> Result<[u8; 32]> {
        self.epoch_mut(epoch)?.recv.key_at(index)
    }

    pub fn send_key(&mut self, epoch: u64) -> Result<(u32, [u8; 32])> {
        Ok(self.epoch_mut(epoch)?.send.send_next())
    }
}

/// How an inbound message's epoch compares to local state (§4.6.2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EpochClass {
    Invalid,
    Stale,
    Current,
    Next,
    OutOfRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_symmetric_between_peers() {
        let secret = [0x77u8; 32];
        let mut a = Chain::bootstrap(&secret, Direction::A2B);
        let mut b = Chain::bootstrap(&secret, Direction::B2A);

        let (idx, key) = a.send_key(1).unwrap();
        let recv = b.recv_key(1, idx).unwrap();
        assert_eq!(key, recv);
    }

    #[test]
    fn out_of_order_recv_then_backfill() {
        let secret = [0x11u8; 32];
        let mut a = Chain::bootstrap(&secret, Direction::A2B);
        let mut b = Chain::bootstrap(&secret, Direction::B2A);

        let keys: Vec<_> = (0..4).map(|_| a.send_key(1).unwrap()).collect();
        let (idx3, key3) = keys[3];
        assert_eq!(b.recv_key(1, idx3).unwrap(), key3);
        for (idx, key) in &keys[..3] {
            assert_eq!(b.recv_key(1, *idx).unwrap(), *key);
        }
    }

    #[test]
    fn reusing_a_consumed_index_is_rejected() {
        let secret = [0x22u8; 32];
        let mut a = Chain::bootstrap(&secret, Direction::A2B);
        let mut b = Chain::bootstrap(&secret, Direction::B2A);
        let (idx, _) = a.send_key(1).unwrap();
        b.recv_key(1, idx).unwrap();
        let err = b.recv_key(1, idx).unwrap_err();
        assert!(matches!(err, RatchetError::KeyAlreadyRequested));
    }

    #[test]
    fn jump_beyond_max_jump_is_rejected() {
        let secret = [0x33u8; 32];
        let mut b = Chain::bootstrap(&secret, Direction::B2A);
        let err = b.recv_key(1, crate::MAX_JUMP + 100).unwrap_err();
        assert!(matches!(err, RatchetError::KeyJump { .. }));
    }

    #[test]
    fn add_epoch_produces_new_symmetric_chains() {
        let secret = [0x44u8; 32];
        let mut a = Chain::bootstrap(&secret, Direction::A2B);
        let mut b = Chain::bootstrap(&secret, Direction::B2A);

        let epoch_secret = [0x55u8; 32];
        a.add_epoch(&epoch_secret).unwrap();
        b.add_epoch(&epoch_secret).unwrap();
        assert_eq!(a.current_epoch, 2);

        let (idx, key) = a.send_key(2).unwrap();
        assert_eq!(b.recv_key(2, idx).unwrap(), key);
    }

    #[test]
    fn classify_epoch_matches_spec_cases() {
        let secret = [0x66u8; 32];
        let chain = Chain::bootstrap(&secret, Direction::A2B);
        assert_eq!(chain.classify_epoch(0), EpochClass::Invalid);
        assert_eq!(chain.classify_epoch(1), EpochClass::Current);
        assert_eq!(chain.classify_epoch(2), EpochClass::Next);
        assert_eq!(chain.classify_epoch(3), EpochClass::OutOfRange);
    }
}
