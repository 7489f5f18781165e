//! Link frame encoding
//!
//! Every over-the-air frame is `[type, seq, echo, payload.., xor]`:
//! a one-byte frame type, the sender's rolling sequence number, an
//! echo of the last sequence number heard from the peer, the payload
//! and a trailing XOR of everything before it.

use heapless::Vec;
use thiserror::Error;

use crate::config::link::{FRAME_OVERHEAD, MAX_FRAME_SIZE, MAX_PAYLOAD};

/// Wire values for the frame type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Carries an application payload
    Data = 0,
    /// Reserved for future acknowledgment support
    Ack = 1,
    /// Announces a (re)started sender and resets peer tracking
    Hello = 2,
}

impl FrameType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FrameType::Data),
            1 => Some(FrameType::Ack),
            2 => Some(FrameType::Hello),
            _ => None,
        }
    }
}

/// Why a received byte string is not a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Shorter than the fixed overhead
    #[error("frame shorter than the {FRAME_OVERHEAD}-byte minimum")]
    TooShort,
    /// XOR trailer does not match the frame body
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    Checksum { computed: u8, received: u8 },
    /// Type byte is not one this protocol defines
    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),
    /// Payload exceeds what one frame can carry
    #[error("payload exceeds {MAX_PAYLOAD} bytes")]
    PayloadTooLong,
}

/// A decoded (or to-be-encoded) link frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameType,
    /// Sender's rolling counter
    pub seq: u8,
    /// Last sequence number the sender heard from us
    pub echo: u8,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

/// XOR of all bytes, the trailer over the frame body
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

impl Frame {
    pub fn new(kind: FrameType, seq: u8, echo: u8, payload: &[u8]) -> Result<Self, FrameError> {
        Ok(Self {
            kind,
            seq,
            echo,
            payload: Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLong)?,
        })
    }

    /// Serialize with the trailing checksum
    pub fn encode(&self) -> Vec<u8, MAX_FRAME_SIZE> {
        let mut bytes = Vec::new();
        // Capacity holds by construction: payload <= MAX_PAYLOAD
        let _ = bytes.push(self.kind as u8);
        let _ = bytes.push(self.seq);
        let _ = bytes.push(self.echo);
        let _ = bytes.extend_from_slice(&self.payload);
        let _ = bytes.push(xor_checksum(&bytes));
        bytes
    }

    /// Parse a received byte string.
    ///
    /// The checksum is validated before the type byte, so corruption is
    /// reported as [`FrameError::Checksum`] rather than as a type the
    /// corruption happened to produce.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(FrameError::TooShort);
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 1);
        let computed = xor_checksum(body);
        let received = trailer[0];
        if computed != received {
            return Err(FrameError::Checksum { computed, received });
        }
        let kind = FrameType::from_byte(body[0]).ok_or(FrameError::UnknownType(body[0]))?;
        Ok(Self {
            kind,
            seq: body[1],
            echo: body[2],
            payload: Vec::from_slice(&body[3..]).map_err(|_| FrameError::PayloadTooLong)?,
        })
    }
}
