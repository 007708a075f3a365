//! Length-prefixed typed frames.
//!
//! Wire format:
//! ```text
//! +0   Payload Length (4 bytes, BE32)
//! +4   Frame Type     (4 bytes, BE32)
//! +8   Payload        (variable, <= 1 MiB)
//! ```
//!
//! The codec treats payloads as opaque bytes; their schema lives in
//! [`super::message`]. The transport is message-oriented, so a frame always
//! arrives whole: trailing or missing bytes are a protocol error.

use crate::core::{ProtocolError, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};

/// Frame type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameType {
    /// Handshake initiation (M1), sent raw.
    HandshakeInit = 0x01,
    /// Handshake response (M2), sent raw.
    HandshakeResp = 0x02,
    /// Directory listing request.
    List = 0x10,
    /// Metadata request for one entry.
    Stat = 0x11,
    /// Ranged file read request.
    Read = 0x12,
    /// File write request.
    Write = 0x13,
    /// Recursive delete request.
    Delete = 0x14,
    /// Rename request.
    Rename = 0x15,
    /// Directory creation request.
    Mkdir = 0x16,
    /// Successful operation response.
    Response = 0x20,
    /// Typed error response.
    Error = 0x21,
    /// Liveness probe.
    Ping = 0x30,
    /// Liveness reply.
    Pong = 0x31,
}

impl FrameType {
    /// The wire tag.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(FrameType::HandshakeInit),
            0x02 => Ok(FrameType::HandshakeResp),
            0x10 => Ok(FrameType::List),
            0x11 => Ok(FrameType::Stat),
            0x12 => Ok(FrameType::Read),
            0x13 => Ok(FrameType::Write),
            0x14 => Ok(FrameType::Delete),
            0x15 => Ok(FrameType::Rename),
            0x16 => Ok(FrameType::Mkdir),
            0x20 => Ok(FrameType::Response),
            0x21 => Ok(FrameType::Error),
            0x30 => Ok(FrameType::Ping),
            0x31 => Ok(FrameType::Pong),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// A typed frame with an opaque payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Type tag.
    pub frame_type: FrameType,
    /// Payload bytes (schema per tag, see [`super::message`]).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, rejecting oversized payloads.
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }
        Ok(Self { frame_type, payload })
    }

    /// An empty-payload frame (ping, pong).
    pub fn empty(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            payload: Vec::new(),
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.frame_type.as_u32().to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse one whole frame from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::Truncated);
        }

        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if length > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge(length));
        }
        if bytes.len() != FRAME_HEADER_SIZE + length {
            return Err(ProtocolError::Truncated);
        }

        let tag = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let frame_type = FrameType::try_from(tag)?;

        Ok(Self {
            frame_type,
            payload: bytes[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}
