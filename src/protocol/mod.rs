//! Layer L5 — wire framing (§6): message types and varint encode/decode.

pub mod messages;
pub mod wire;

pub use messages::{
    parse_version_byte, version_byte, PreKeySignalMessage, SignalMessage,
};
