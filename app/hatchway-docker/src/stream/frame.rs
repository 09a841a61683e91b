//! Docker multiplexed-stream framing.
//!
//! Without a TTY, stdout and stderr share one channel and every chunk is
//! prefixed by an 8-byte header:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | stream |   0    |   0    |   0    |   length (u32, big-endian)        |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! With a TTY the payload is forwarded unchanged.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Standard stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamType {
    /// Standard input.
    Stdin = 0,
    /// Standard output.
    Stdout = 1,
    /// Standard error.
    Stderr = 2,
}

impl StreamType {
    /// Returns the stream name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl TryFrom<u8> for StreamType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Stdin),
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(FrameError::UnknownStream(other)),
        }
    }
}

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Payload does not fit the 32-bit length field.
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    /// Header names a stream type other than 0, 1 or 2.
    #[error("unknown stream type {0}")]
    UnknownStream(u8),
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream the payload belongs to.
    pub stream: StreamType,
    /// Payload bytes.
    pub payload: Bytes,
}

/// Encodes one chunk of output.
///
/// In TTY mode the payload is returned as is. Otherwise a header is
/// prepended.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if the payload is longer than
/// `u32::MAX`. Callers read in bounded chunks so this never happens on the
/// stream path.
pub fn encode(stream: StreamType, payload: Bytes, tty: bool) -> Result<Bytes, FrameError> {
    if tty {
        return Ok(payload);
    }
    let len = frame_len(payload.len())?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(stream as u8);
    buf.put_bytes(0, 3);
    buf.put_u32(len);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// An empty stdout frame. Clients skip it, but writing it tells a live
/// connection from a dead one.
#[must_use]
pub fn keepalive() -> Bytes {
    Bytes::from_static(&[StreamType::Stdout as u8, 0, 0, 0, 0, 0, 0, 0])
}

fn frame_len(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge(len))
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` does not yet hold a complete frame, leaving
/// it untouched.
///
/// # Errors
///
/// Returns an error if the header names an unknown stream type.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let stream = StreamType::try_from(buf[0])?;
    let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();
    Ok(Some(Frame { stream, payload }))
}
