//! Information Packets
//!
//! The unit exchanged between flow-network components. On the wire an IP is
//! a multi-frame message whose first frame is a single type byte:
//!
//! | type | meaning          | remaining frames                |
//! |------|------------------|---------------------------------|
//! | `[`  | open bracket     | none, or one empty frame        |
//! | `]`  | close bracket    | none, or one empty frame        |
//! | `d`  | data packet      | one or more fields              |
//!
//! A data packet with two fields carries an explicit topic in field 0.

mod codec;

use std::fmt;

use bytes::Bytes;

pub use codec::{encode_message, CodecError, FrameDecoder, MAX_MESSAGE_SIZE};

/// Type byte of an open bracket
pub const OPEN_BRACKET: u8 = b'[';
/// Type byte of a close bracket
pub const CLOSE_BRACKET: u8 = b']';
/// Type byte of a data packet
pub const DATA: u8 = b'd';

/// Errors for frame sequences that are not a valid IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpError {
    /// Message carried no frames at all
    Empty,
    /// First frame is not a single type byte
    InvalidHeader(usize),
    /// Unknown type byte
    UnknownType(u8),
    /// Data packet without any field
    MissingPayload,
    /// Bracket with a non-empty body
    BracketWithPayload,
}

impl fmt::Display for IpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty message"),
            Self::InvalidHeader(len) => write!(f, "invalid IP header of {} bytes", len),
            Self::UnknownType(t) => write!(f, "unknown IP type: {:#04x}", t),
            Self::MissingPayload => write!(f, "data packet without payload"),
            Self::BracketWithPayload => write!(f, "bracket carries a payload"),
        }
    }
}

impl std::error::Error for IpError {}

/// Data packet fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    fields: Vec<Bytes>,
}

impl Packet {
    /// Single-field packet carrying only a payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            fields: vec![payload.into()],
        }
    }

    /// Two-field packet carrying an explicit topic
    pub fn with_topic(topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            fields: vec![topic.into(), payload.into()],
        }
    }

    /// Build from raw fields; at least one is required
    pub fn from_fields(fields: Vec<Bytes>) -> Result<Self, IpError> {
        if fields.is_empty() {
            return Err(IpError::MissingPayload);
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// First field
    pub fn head(&self) -> &Bytes {
        &self.fields[0]
    }

    /// Last field
    pub fn payload(&self) -> &Bytes {
        &self.fields[self.fields.len() - 1]
    }

    /// Explicit topic of a two-field packet
    pub fn topic(&self) -> Option<&Bytes> {
        if self.fields.len() == 2 {
            Some(&self.fields[0])
        } else {
            None
        }
    }

    pub fn into_payload(mut self) -> Bytes {
        self.fields.swap_remove(self.fields.len() - 1)
    }
}

/// Information packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ip {
    OpenBracket,
    CloseBracket,
    Packet(Packet),
}

impl Ip {
    /// Single-field data packet
    pub fn packet(payload: impl Into<Bytes>) -> Self {
        Ip::Packet(Packet::new(payload))
    }

    pub fn is_bracket(&self) -> bool {
        matches!(self, Ip::OpenBracket | Ip::CloseBracket)
    }

    /// Classify a received frame sequence
    pub fn from_frames(mut frames: Vec<Bytes>) -> Result<Self, IpError> {
        if frames.is_empty() {
            return Err(IpError::Empty);
        }
        let header = frames.remove(0);
        if header.len() != 1 {
            return Err(IpError::InvalidHeader(header.len()));
        }

        match header[0] {
            OPEN_BRACKET | CLOSE_BRACKET => {
                if frames.iter().any(|f| !f.is_empty()) {
                    return Err(IpError::BracketWithPayload);
                }
                if header[0] == OPEN_BRACKET {
                    Ok(Ip::OpenBracket)
                } else {
                    Ok(Ip::CloseBracket)
                }
            }
            DATA => Packet::from_fields(frames).map(Ip::Packet),
            other => Err(IpError::UnknownType(other)),
        }
    }

    /// Frame sequence for the wire; brackets carry one empty body frame
    pub fn into_frames(self) -> Vec<Bytes> {
        match self {
            Ip::OpenBracket => vec![Bytes::from_static(&[OPEN_BRACKET]), Bytes::new()],
            Ip::CloseBracket => vec![Bytes::from_static(&[CLOSE_BRACKET]), Bytes::new()],
            Ip::Packet(packet) => {
                let mut frames = Vec::with_capacity(packet.fields.len() + 1);
                frames.push(Bytes::from_static(&[DATA]));
                frames.extend(packet.fields);
                frames
            }
        }
    }
}
