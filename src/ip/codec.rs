//! Transport Message Codec
//!
//! Length-delimited multi-frame messages:
//!
//! ```text
//! varint body_len | varint frame_count | (varint frame_len | bytes)*
//! ```
//!
//! Integers use the MQTT Variable Byte Integer encoding.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest body a Variable Byte Integer can describe (~256 MB)
pub const MAX_MESSAGE_SIZE: usize = 268_435_455;

/// Errors raised while encoding or decoding transport messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough data in buffer
    InsufficientData,
    /// Variable Byte Integer longer than four bytes
    InvalidLength,
    /// Message body exceeds the configured maximum
    MessageTooLarge(usize),
    /// Body does not match its frame table
    Malformed(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidLength => write!(f, "invalid length encoding"),
            Self::MessageTooLarge(len) => write!(f, "message too large: {} bytes", len),
            Self::Malformed(msg) => write!(f, "malformed message: {}", msg),
        }
    }
}

impl std::error::Error for CodecError {}

/// Read a Variable Byte Integer from buffer
/// Returns (value, bytes_consumed) or error
#[inline]
fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), CodecError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut pos = 0;

    loop {
        if pos >= buf.len() {
            return Err(CodecError::InsufficientData);
        }
        if pos >= 4 {
            return Err(CodecError::InvalidLength);
        }

        let byte = buf[pos];
        value += ((byte & 0x7F) as u32) * multiplier;
        pos += 1;

        if (byte & 0x80) == 0 {
            break;
        }

        multiplier *= 128;
    }

    Ok((value, pos))
}

#[inline]
fn write_variable_int(buf: &mut BytesMut, mut value: u32) {
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

#[inline]
fn variable_int_len(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 16_384 {
        2
    } else if value < 2_097_152 {
        3
    } else {
        4
    }
}

/// Append one encoded message to `buf`
pub fn encode_message(frames: &[Bytes], buf: &mut BytesMut) -> Result<(), CodecError> {
    let body_len = frames
        .iter()
        .fold(variable_int_len(frames.len()), |acc, f| {
            acc + variable_int_len(f.len()) + f.len()
        });
    if body_len > MAX_MESSAGE_SIZE || frames.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(body_len));
    }

    buf.reserve(variable_int_len(body_len) + body_len);
    write_variable_int(buf, body_len as u32);
    write_variable_int(buf, frames.len() as u32);
    for frame in frames {
        write_variable_int(buf, frame.len() as u32);
        buf.put_slice(frame);
    }
    Ok(())
}

/// Incremental message decoder
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Split the next complete message off the front of `buf`
    ///
    /// Returns `Ok(None)` until a whole message is buffered.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Vec<Bytes>>, CodecError> {
        let (body_len, len_bytes) = match read_variable_int(buf) {
            Ok(r) => r,
            Err(CodecError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };
        let body_len = body_len as usize;

        if body_len > self.max_message_size {
            return Err(CodecError::MessageTooLarge(body_len));
        }
        if buf.len() < len_bytes + body_len {
            return Ok(None);
        }

        buf.advance(len_bytes);
        let body = buf.split_to(body_len).freeze();
        split_frames(&body).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn split_frames(body: &Bytes) -> Result<Vec<Bytes>, CodecError> {
    let (count, mut pos) =
        read_variable_int(body).map_err(|_| CodecError::Malformed("bad frame count"))?;

    // Each frame needs at least its length byte
    if count as usize > body.len() - pos {
        return Err(CodecError::Malformed("frame count exceeds body"));
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, n) = read_variable_int(&body[pos..])
            .map_err(|_| CodecError::Malformed("bad frame length"))?;
        pos += n;
        let end = pos + len as usize;
        if end > body.len() {
            return Err(CodecError::Malformed("frame exceeds body"));
        }
        frames.push(body.slice(pos..end));
        pos = end;
    }

    if pos != body.len() {
        return Err(CodecError::Malformed("trailing bytes after last frame"));
    }
    Ok(frames)
}
