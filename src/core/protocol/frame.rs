// src/core/protocol/frame.rs

//! Implements the length-prefixed framing used during the handshake phase.
//!
//! Every handshake message travels as a 4-byte big-endian length followed by exactly that
//! many payload bytes. Once a connection is classified the framing is dropped and the
//! socket carries raw bytes for the rest of its life.

use super::messages::RelayMessage;
use crate::core::RelayError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// The size of the length prefix in front of every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// The default upper bound for a single frame payload. Handshake messages are tiny, so
/// anything near this is a misbehaving or non-relay peer.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Consumes one complete frame from the front of `buf`, returning its payload.
///
/// Returns `Ok(None)` without consuming anything when fewer than four bytes are buffered, or
/// when the declared payload has not fully arrived yet. The length prefix stays in the buffer
/// for the next attempt, so this can be called again each time more bytes are appended.
pub fn read_message(buf: &mut BytesMut, max_frame_len: usize) -> Result<Option<Bytes>, RelayError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_frame_len {
        return Err(RelayError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    if buf.len() < LENGTH_PREFIX_LEN + len {
        // Reserve room for the rest of the frame so the next read can land in one go.
        buf.reserve(LENGTH_PREFIX_LEN + len - buf.len());
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Appends `payload` to `dst` as a single length-prefixed frame.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<(), RelayError> {
    let len = u32::try_from(payload.len()).map_err(|_| RelayError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(LENGTH_PREFIX_LEN + payload.len());
    dst.put_u32(len);
    dst.extend_from_slice(payload);
    Ok(())
}

/// Serializes `message` and returns it as a complete frame, prefix included.
pub fn frame_message<M: RelayMessage>(message: &M) -> Result<Bytes, RelayError> {
    let payload = message.to_bytes()?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    encode_frame(&payload, &mut buf)?;
    debug!(
        "Message type [{}] serialized into ({}) bytes and wrapped as ({}) bytes.",
        M::NAME,
        payload.len(),
        buf.len()
    );
    Ok(buf.freeze())
}

/// Writes `message` to `writer` as one length-prefixed frame and flushes it.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
    M: RelayMessage,
{
    let frame = frame_message(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next frame from `buf` and decodes it as `M`, validating required fields.
pub fn read_typed<M: RelayMessage>(
    buf: &mut BytesMut,
    max_frame_len: usize,
) -> Result<Option<M>, RelayError> {
    match read_message(buf, max_frame_len)? {
        Some(payload) => {
            debug!("Parsing [{}] in ({}) bytes.", M::NAME, payload.len());
            M::from_bytes(&payload).map(Some)
        }
        None => Ok(None),
    }
}
