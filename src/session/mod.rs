//! Layers L2–L4: session state, the session cipher, and X3DH/PQXDH
//! handshake establishment.

pub mod builder;
pub mod cipher;
pub mod persist;
mod replay_cache;
pub mod state;

pub use state::{SessionPhase, SessionRecord, SessionState};
