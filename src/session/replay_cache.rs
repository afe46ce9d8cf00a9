//! Process-wide duplicate-ciphertext cache (§4.4), a second line of defense
//! against replay on top of each chain's own counter/message-key bookkeeping
//! — e.g. a persisted record restored from an older snapshot whose
//! already-consumed message keys were regenerated would otherwise re-accept
//! a retransmitted wire message.
//!
//! Grounded on the teacher's PING dedup cache (`crypto::replay_cache`):
//! a capacity-bounded `lru::LruCache` behind a `once_cell::sync::Lazy` static,
//! keyed by sender identity plus a content hash.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

type CacheKey = ([u8; 33], [u8; 32]);

const CAPACITY: usize = 10_000;

static SEEN: Lazy<Mutex<LruCache<CacheKey, i64>>> = Lazy::new(|| {
    let capacity = NonZeroUsize::new(CAPACITY).unwrap();
    Mutex::new(LruCache::new(capacity))
});

/// SHA-256 of the exact wire bytes, used as the cache's content key.
pub fn hash_ciphertext(wire: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(wire);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Returns `true` the first time `(sender_id, ciphertext_hash)` is seen,
/// inserting it; `false` if it's a replay of an already-seen pair.
pub fn check_and_insert(sender_id: [u8; 33], ciphertext_hash: [u8; 32], now_ms: i64) -> bool {
    let mut cache = SEEN.lock().unwrap();
    let key = (sender_id, ciphertext_hash);

    if cache.contains(&key) {
        log::warn!(
            "replay cache: duplicate ciphertext from sender {}",
            hex::encode(&sender_id[1..9])
        );
        return false;
    }

    cache.put(key, now_ms);
    true
}

#[cfg(test)]
pub fn clear() {
    SEEN.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_then_replay() {
        clear();
        let sender = [0x05u8; 33];
        let hash = [0x11u8; 32];
        assert!(check_and_insert(sender, hash, 0));
        assert!(!check_and_insert(sender, hash, 1));
    }

    #[test]
    fn different_hashes_both_pass() {
        clear();
        let sender = [0x05u8; 33];
        assert!(check_and_insert(sender, [0x01u8; 32], 0));
        assert!(check_and_insert(sender, [0x02u8; 32], 0));
    }
}
