// src/core/protocol/codec.rs

//! A `tokio_util::codec` adapter over the length-prefixed framing, for peers that drive a
//! connection through `Framed` during the handshake and then take the raw stream back.

use super::frame::{self, DEFAULT_MAX_FRAME_LEN};
use super::messages::RelayMessage;
use crate::core::RelayError;
use bytes::BytesMut;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Decodes frames as `In` messages and encodes any `RelayMessage` into a frame.
#[derive(Debug)]
pub struct MessageCodec<In> {
    max_frame_len: usize,
    _marker: PhantomData<fn() -> In>,
}

impl<In> MessageCodec<In> {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            _marker: PhantomData,
        }
    }
}

impl<In> Default for MessageCodec<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: RelayMessage> Decoder for MessageCodec<In> {
    type Item = In;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        frame::read_typed(src, self.max_frame_len)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() => Ok(None),
            None => Err(RelayError::IncompleteMessage),
        }
    }
}

impl<In, Out: RelayMessage> Encoder<Out> for MessageCodec<In> {
    type Error = RelayError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.to_bytes()?;
        frame::encode_frame(&payload, dst)
    }
}
