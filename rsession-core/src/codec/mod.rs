//! Wire framing for multiplexed messages.
//!
//! ```text
//! name_len:    u16  (LE, 1..=255)
//! name:        [u8] (UTF-8)
//! sequence:    u64  (LE)
//! payload_len: u32  (LE)
//! payload:     [u8]
//! ```
//!
//! [`MuxCodec`] implements `tokio_util`'s `Decoder` / `Encoder` so it
//! can drive a `Framed` stream directly (the handshake does this) or be
//! fed chunk by chunk by the demultiplexer.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SessionError;
use crate::message::{MAX_CHANNEL_NAME, Message, validate_channel_name};

/// Fixed bytes around the variable-length name and payload.
pub const FRAME_OVERHEAD: usize = 2 + 8 + 4;

/// Default cap on a single payload (32 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MuxCodec {
    max_payload: usize,
    /// Last decoded channel name, reused when consecutive frames share it.
    last_name: Option<Arc<str>>,
}

impl MuxCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            last_name: None,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn intern(&mut self, raw: &[u8]) -> Result<Arc<str>, SessionError> {
        if let Some(last) = &self.last_name {
            if last.as_bytes() == raw {
                return Ok(Arc::clone(last));
            }
        }
        let name = std::str::from_utf8(raw)
            .map_err(|_| SessionError::ProtocolViolation("channel name is not UTF-8".into()))?;
        let name: Arc<str> = Arc::from(name);
        self.last_name = Some(Arc::clone(&name));
        Ok(name)
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for MuxCodec {
    type Item = Message;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let name_len = u16::from_le_bytes([src[0], src[1]]) as usize;
        if name_len == 0 || name_len > MAX_CHANNEL_NAME {
            return Err(SessionError::ProtocolViolation(format!(
                "channel name length {name_len} out of range"
            )));
        }

        let header_len = 2 + name_len + 8 + 4;
        if src.len() < header_len {
            src.reserve(header_len - src.len());
            return Ok(None);
        }

        let len_at = 2 + name_len + 8;
        let payload_len = u32::from_le_bytes([
            src[len_at],
            src[len_at + 1],
            src[len_at + 2],
            src[len_at + 3],
        ]) as usize;
        if payload_len > self.max_payload {
            return Err(SessionError::FrameTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let total = header_len + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(2);
        let name_bytes = frame.split_to(name_len);
        let channel = self.intern(&name_bytes)?;
        let sequence = frame.get_u64_le();
        let _ = frame.get_u32_le();
        let payload = frame.freeze();

        Ok(Some(Message::new(channel, sequence, payload)))
    }
}

impl Encoder<Message> for MuxCodec {
    type Error = SessionError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        validate_channel_name(item.channel())?;
        let payload = item.payload();
        if payload.len() > self.max_payload {
            return Err(SessionError::FrameTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        dst.reserve(FRAME_OVERHEAD + item.channel().len() + payload.len());
        dst.put_u16_le(item.channel().len() as u16);
        dst.put_slice(item.channel().as_bytes());
        dst.put_u64_le(item.sequence());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(channel: &str, seq: u64, payload: &'static [u8]) -> Message {
        Message::new(Arc::from(channel), seq, Bytes::from_static(payload))
    }

    #[test]
    fn encode_layout_matches_wire_format() {
        let mut codec = MuxCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(msg("ab", 7, b"xyz"), &mut buf).unwrap();

        assert_eq!(&buf[0..2], &2u16.to_le_bytes());
        assert_eq!(&buf[2..4], b"ab");
        assert_eq!(&buf[4..12], &7u64.to_le_bytes());
        assert_eq!(&buf[12..16], &3u32.to_le_bytes());
        assert_eq!(&buf[16..], b"xyz");
    }

    #[test]
    fn decodes_back_to_back_frames_split_across_reads() {
        let mut codec = MuxCodec::default();
        let mut wire = BytesMut::new();
        codec.encode(msg("rs.input", 1, b"first"), &mut wire).unwrap();
        codec.encode(msg("rs.framebuffer", 9, b"second"), &mut wire).unwrap();

        // Feed one byte at a time; frames must appear only when complete.
        let mut src = BytesMut::new();
        let mut out = Vec::new();
        for b in wire.iter() {
            src.put_u8(*b);
            while let Some(m) = codec.decode(&mut src).unwrap() {
                out.push(m);
            }
        }

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].channel(), "rs.input");
        assert_eq!(out[0].sequence(), 1);
        assert_eq!(out[0].payload().as_ref(), b"first");
        assert_eq!(out[1].channel(), "rs.framebuffer");
        assert_eq!(out[1].sequence(), 9);
        assert!(src.is_empty());
    }

    #[test]
    fn oversize_payload_is_rejected_before_buffering() {
        let mut codec = MuxCodec::new(4);
        let mut src = BytesMut::new();
        src.put_u16_le(1);
        src.put_u8(b'a');
        src.put_u64_le(0);
        src.put_u32_le(1024);
        assert!(matches!(
            codec.decode(&mut src),
            Err(SessionError::FrameTooLarge { size: 1024, max: 4 })
        ));
    }

    #[test]
    fn zero_length_name_is_a_protocol_violation() {
        let mut codec = MuxCodec::default();
        let mut src = BytesMut::from(&[0u8, 0, 1, 2, 3][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(SessionError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn non_utf8_name_is_rejected() {
        let mut codec = MuxCodec::default();
        let mut src = BytesMut::new();
        src.put_u16_le(2);
        src.put_slice(&[0xC3, 0x28]);
        src.put_u64_le(0);
        src.put_u32_le(0);
        assert!(codec.decode(&mut src).is_err());
    }

    #[test]
    fn encoder_refuses_payload_over_limit() {
        let mut codec = MuxCodec::new(2);
        let mut dst = BytesMut::new();
        assert!(codec.encode(msg("a", 0, b"toolong"), &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
