//! Layer L7: the storage contracts (§4.7).
//!
//! The crate never touches a database or filesystem itself. Every durable
//! thing a session needs — identities, session records, pre-keys — is held
//! behind a trait that the embedding application implements over whatever
//! storage it already has (SQLite, a KV store, platform keychain). This
//! mirrors the teacher's `storage` module, which documents a capability
//! contract "implemented by the application, not by the core" rather than
//! providing a concrete backend.
//!
//! Methods are `async` (via `async_trait`, grounded on
//! `guard-core::ipc::IpcHandler`) since real implementations typically hit
//! disk or a platform API; an in-process store can still implement these
//! trivially by never yielding internally.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{
    IdentityKey, IdentityKeyPair, KyberPreKeyRecord, PreKeyRecord, ProtocolAddress,
    SignedPreKeyRecord,
};
#[cfg(test)]
use crate::keys::RootKey;
use crate::session::SessionRecord;
#[cfg(test)]
use crate::session::SessionState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no record found for {0}")]
    NotFound(String),
    #[error("store I/O failure: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The local identity key pair plus the per-peer identity trust table
/// (§4.7: "decide whether to accept a changed identity key").
#[async_trait]
pub trait IdentityKeyStore: Send + Sync {
    async fn get_identity_key_pair(&self) -> Result<IdentityKeyPair>;

    async fn get_local_registration_id(&self) -> Result<u32>;

    /// Record `identity` as trusted for `address`. Returns `true` if this
    /// replaced a previously trusted, different identity key (the caller
    /// may want to surface a "safety number changed" warning).
    async fn save_identity(&self, address: &ProtocolAddress, identity: &IdentityKey)
        -> Result<bool>;

    /// Policy hook consulted before completing a handshake or accepting a
    /// message from `address` under `identity`. Implementations unwilling to
    /// accept unpinned identity changes return `false` here and the caller
    /// surfaces [`crate::error::RatchetError::UntrustedIdentity`].
    async fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool>;

    async fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>>;
}

/// One [`SessionRecord`] per [`ProtocolAddress`] (§3: "keyed by
/// `ProtocolAddress`").
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    async fn store_session(&self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    async fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        Ok(self.load_session(address).await?.is_some())
    }

    async fn delete_session(&self, address: &ProtocolAddress) -> Result<()>;

    /// All addresses with a session for `name`, across every `device_id`
    /// (§4.7: multi-device fan-out on send).
    async fn all_sessions_for(&self, name: &str) -> Result<Vec<ProtocolAddress>>;
}

/// One-time pre-keys are consumed exactly once (§4.2 step 2: "remove the
/// one-time pre-key from storage once used").
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    async fn load_pre_key(&self, pre_key_id: u32) -> Result<Option<PreKeyRecord>>;

    async fn store_pre_key(&self, pre_key_id: u32, record: &PreKeyRecord) -> Result<()>;

    async fn remove_pre_key(&self, pre_key_id: u32) -> Result<()>;
}

/// Signed pre-keys rotate on a schedule set by the application; the store
/// just holds whichever ones are still referenced by in-flight bundles.
#[async_trait]
pub trait SignedPreKeyStore: Send + Sync {
    async fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;

    async fn store_signed_pre_key(&self, id: u32, record: &SignedPreKeyRecord) -> Result<()>;

    async fn all_signed_pre_key_ids(&self) -> Result<Vec<u32>>;
}

/// Kyber (ML-KEM) pre-keys: last-resort ones are never removed on use
/// (§4.2: "a last-resort Kyber pre-key MAY be reused across bundles");
/// ordinary ones are removed like [`PreKeyStore`]'s one-time keys.
#[async_trait]
pub trait KyberPreKeyStore: Send + Sync {
    async fn load_kyber_pre_key(&self, id: u32) -> Result<Option<KyberPreKeyRecord>>;

    async fn store_kyber_pre_key(&self, id: u32, record: &KyberPreKeyRecord) -> Result<()>;

    /// No-op for last-resort keys; implementations should check
    /// `record.is_last_resort` before actually deleting.
    async fn mark_kyber_pre_key_used(&self, id: u32) -> Result<()>;
}

/// Group-messaging sender keys. Out of scope for this crate's ratchet core
/// (§2 Non-goals: "group sender-key fan-out"); the trait is declared so a
/// caller wiring up a full messaging stack has a consistent storage seam to
/// implement against, without this crate prescribing a sender-key ratchet.
#[async_trait]
pub trait SenderKeyStore: Send + Sync {
    async fn store_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: [u8; 16],
        record: Vec<u8>,
    ) -> Result<()>;

    async fn load_sender_key(
        &self,
        sender: &ProtocolAddress,
        distribution_id: [u8; 16],
    ) -> Result<Option<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A minimal in-memory `SessionStore`, standing in for an application's
    /// real backend, to confirm the trait is actually object-safe and usable
    /// across an `await` boundary.
    struct InMemorySessionStore {
        sessions: Mutex<HashMap<(String, u32), SessionRecord>>,
    }

    #[async_trait]
    impl SessionStore for InMemorySessionStore {
        async fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .get(&(address.name.clone(), address.device_id))
                .cloned())
        }

        async fn store_session(
            &self,
            address: &ProtocolAddress,
            record: &SessionRecord,
        ) -> Result<()> {
            self.sessions
                .lock()
                .unwrap()
                .insert((address.name.clone(), address.device_id), record.clone());
            Ok(())
        }

        async fn delete_session(&self, address: &ProtocolAddress) -> Result<()> {
            self.sessions
                .lock()
                .unwrap()
                .remove(&(address.name.clone(), address.device_id));
            Ok(())
        }

        async fn all_sessions_for(&self, name: &str) -> Result<Vec<ProtocolAddress>> {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .keys()
                .filter(|(n, _)| n == name)
                .map(|(n, d)| ProtocolAddress::new(n.clone(), *d))
                .collect())
        }
    }

    #[tokio::test]
    async fn in_memory_store_roundtrips() {
        let store = InMemorySessionStore {
            sessions: Mutex::new(HashMap::new()),
        };
        let address = ProtocolAddress::new("alice".to_string(), 1);
        assert!(store.load_session(&address).await.unwrap().is_none());
        assert!(!store.contains_session(&address).await.unwrap());

        let identity = crate::identity::IdentityKeyPair::generate();
        let state = SessionState::new(
            *identity.identity_key(),
            *identity.identity_key(),
            RootKey([0u8; 32]),
            1,
            1,
        );
        let record = SessionRecord::new(state);
        store.store_session(&address, &record).await.unwrap();
        assert!(store.contains_session(&address).await.unwrap());

        let all = store.all_sessions_for("alice").await.unwrap();
        assert_eq!(all.len(), 1);

        store.delete_session(&address).await.unwrap();
        assert!(store.load_session(&address).await.unwrap().is_none());
    }
}
