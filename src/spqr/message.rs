//! SPQR V1 wire messages (§6 "SPQR V1 message").
//!
//! Uses the same flat varint primitives as [`crate::protocol::wire`] (no
//! protobuf tags here — the SPQR frame is a fixed positional sequence, not a
//! field set).

use crate::error::{RatchetError, Result};
use crate::protocol::wire::{read_varint, write_varint};
use crate::spqr::poly::CHUNK_SIZE;

pub const SPQR_VERSION: u8 = 1;

/// One SPQR chunk: a 32-byte erasure-coded slice of a header/pubkey/ciphertext,
/// tagged with its 1-indexed position in the encoder's sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: u32,
    pub chunk_data: [u8; CHUNK_SIZE],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MsgType {
    None,
    Hdr(Chunk),
    Ek(Chunk),
    EkCt1Ack(Chunk),
    Ct1Ack,
    Ct1(Chunk),
    Ct2(Chunk),
}

impl MsgType {
    fn tag(&self) -> u8 {
        match self {
            MsgType::None => 0x00,
            MsgType::Hdr(_) => 0x01,
            MsgType::Ek(_) => 0x02,
            MsgType::EkCt1Ack(_) => 0x03,
            MsgType::Ct1Ack => 0x04,
            MsgType::Ct1(_) => 0x05,
            MsgType::Ct2(_) => 0x06,
        }
    }

    fn chunk(&self) -> Option<&Chunk> {
        match self {
            MsgType::Hdr(c) | MsgType::Ek(c) | MsgType::EkCt1Ack(c) | MsgType::Ct1(c) | MsgType::Ct2(c) => Some(c),
            MsgType::None | MsgType::Ct1Ack => None,
        }
    }
}

/// `[version:u8=1][epoch:varint u64][index:varint u32][msg_type:u8][optional chunk]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpqrMessage {
    pub epoch: u64,
    pub index: u32,
    pub msg_type: MsgType,
}

impl SpqrMessage {
    /// `epoch == 0` is rejected on encode (§8 testable property 8).
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.epoch == 0 {
            return Err(RatchetError::InvalidMessage(
                "SPQR epoch must be nonzero".to_string(),
            ));
        }
        let mut out = vec![SPQR_VERSION];
        write_varint(&mut out, self.epoch);
        write_varint(&mut out, self.index as u64);
        out.push(self.msg_type.tag());
        if let Some(chunk) = self.msg_type.chunk() {
            write_varint(&mut out, chunk.chunk_index as u64);
            out.extend_from_slice(&chunk.chunk_data);
        }
        Ok(out)
    }

    /// Returns the decoded message and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(SpqrMessage, usize)> {
        let mut pos = 0usize;
        let version = *buf
            .first()
            .ok_or_else(|| RatchetError::InvalidMessage("empty SPQR message".to_string()))?;
        if version != SPQR_VERSION {
            return Err(RatchetError::InvalidMessage(format!(
                "unsupported SPQR version {version}"
            )));
        }
        pos += 1;

        let epoch = read_varint(buf, &mut pos)?;
        if epoch == 0 {
            return Err(RatchetError::InvalidMessage(
                "SPQR epoch must be nonzero".to_string(),
            ));
        }
        let index = read_varint(buf, &mut pos)? as u32;
        let tag = *buf
            .get(pos)
            .ok_or_else(|| RatchetError::InvalidMessage("truncated SPQR msg_type".to_string()))?;
        pos += 1;

        let read_chunk = |buf: &[u8], pos: &mut usize| -> Result<Chunk> {
            let chunk_index = read_varint(buf, pos)? as u32;
            let end = *pos + CHUNK_SIZE;
            let slice = buf.get(*pos..end).ok_or_else(|| {
                RatchetError::InvalidMessage("truncated SPQR chunk data".to_string())
            })?;
            let mut chunk_data = [0u8; CHUNK_SIZE];
            chunk_data.copy_from_slice(slice);
            *pos = end;
            Ok(Chunk {
                chunk_index,
                chunk_data,
            })
        };

        let msg_type = match tag {
            0x00 => MsgType::None,
            0x01 => MsgType::Hdr(read_chunk(buf, &mut pos)?),
            0x02 => MsgType::Ek(read_chunk(buf, &mut pos)?),
            0x03 => MsgType::EkCt1Ack(read_chunk(buf, &mut pos)?),
            0x04 => MsgType::Ct1Ack,
            0x05 => MsgType::Ct1(read_chunk(buf, &mut pos)?),
            0x06 => MsgType::Ct2(read_chunk(buf, &mut pos)?),
            other => {
                return Err(RatchetError::InvalidMessage(format!(
                    "unknown SPQR msg_type {other}"
                )))
            }
        };

        Ok((
            SpqrMessage {
                epoch,
                index,
                msg_type,
            },
            pos,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 S5: epoch=1, index=0, Ct1Ack -> bytes `01 01 00 04`, bytesRead == 4.
    #[test]
    fn seed_vector_s5_ct1ack() {
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

    #[test]
    fn epoch_zero_rejected_on_encode_and_decode() {
        let msg = SpqrMessage {
            epoch: 0,
            index: 0,
            msg_type: MsgType::Ct1Ack,
        };
        assert!(msg.encode().is_err());
        assert!(SpqrMessage::decode(&[0x01, 0x00, 0x00, 0x04]).is_err());
    }

    #[test]
    fn chunked_message_roundtrip() {
        let msg = SpqrMessage {
            epoch: 3,
            index: 7,
            msg_type: MsgType::Hdr(Chunk {
                chunk_index: 2,
                chunk_data: [0x9Bu8; CHUNK_SIZE],
            }),
        };
        let encoded = msg.encode().unwrap();
        let (decoded, bytes_read) = SpqrMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(bytes_read, encoded.len());
    }
}
