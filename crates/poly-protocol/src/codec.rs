use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Frame, MAX_MESSAGE_SIZE};

/// Codec for relay messages.
///
/// Framed form: `[4 bytes len][1 byte tag][payload]`, where `len` counts the
/// tag and payload. HTTP bodies use the bare payload.
pub struct RelayCodec;

impl RelayCodec {
    pub fn encode<M: Frame>(msg: &M) -> ProtocolResult<Vec<u8>> {
        let payload = Self::encode_payload(msg)?;
        let len = u32::try_from(payload.len() + 1).map_err(|_| ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        })?;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode one framed message. Returns (message, bytes_consumed).
    pub fn decode<M: Frame>(data: &[u8]) -> ProtocolResult<(M, usize)> {
        let Some((header, rest)) = data.split_first_chunk::<4>() else {
            return Err(ProtocolError::FramingError("too short".into()));
        };
        let len = u32::from_be_bytes(*header) as usize;
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        if rest.len() < len {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                4 + len
            )));
        }
        let tag = rest[0];
        let msg: M = Self::decode_payload(&rest[1..len])?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::FramingError(format!(
                "tag {tag} does not match {} payload",
                msg.type_name()
            )));
        }
        Ok((msg, 4 + len))
    }

    pub fn encode_payload<M: Frame>(msg: &M) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(payload)
    }

    pub fn decode_payload<M: Frame>(data: &[u8]) -> ProtocolResult<M> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        bincode::deserialize(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}
