// src/nat/stun/codec.rs
//! Stream framing for STUN over TCP (RFC 5389 Section 7.2.2).
//!
//! TCP delivers a byte stream, so reads accumulate in the `BytesMut` owned by
//! `Framed` until the header's length field says a whole message is present.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::nat::error::{DecodeError, NatError};
use super::protocol::{Message, HEADER_SIZE, MAGIC_COOKIE};

/// A decoded message together with the exact bytes it arrived as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunFrame {
    pub message: Message,
    pub raw: Bytes,
}

/// Splits a byte stream into STUN messages
#[derive(Debug, Default, Clone, Copy)]
pub struct StunCodec;

impl StunCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for StunCodec {
    type Item = StunFrame;
    type Error = NatError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StunFrame>, NatError> {
        if src.len() < HEADER_SIZE {
            src.reserve(HEADER_SIZE - src.len());
            return Ok(None);
        }

        // Reject non-STUN traffic as soon as the header is in
        let magic = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        if magic != MAGIC_COOKIE {
            return Err(DecodeError::BadMagicCookie(magic).into());
        }

        let body_len = u16::from_be_bytes([src[2], src[3]]) as usize;
        if body_len % 4 != 0 {
            return Err(DecodeError::UnalignedLength(body_len).into());
        }
        let frame_len = HEADER_SIZE + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let raw = src.split_to(frame_len).freeze();
        tracing::trace!("Framed {} byte STUN message", raw.len());
        let message = Message::decode(&raw)?;
        Ok(Some(StunFrame { message, raw }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<StunFrame>, NatError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        // Stream ended inside a frame
        let partial = src.split().freeze();
        if partial.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort(partial.len()).into());
        }
        Message::decode(&partial)?;
        Err(NatError::ConnectionClosed)
    }
}

impl Encoder<Bytes> for StunCodec {
    type Error = NatError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), NatError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
