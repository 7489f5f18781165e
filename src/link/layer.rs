//! Unidirectional sequence-numbered link over a packet radio
//!
//! Wraps a [`Radio`] with the framing from [`crate::link::frame`] and
//! tracks both directions' rolling counters. There are no
//! retransmissions at this layer; sequence gaps are only counted, so
//! the dropped-frame figure is an estimate that a peer reset can skew.

use std::thread;
use std::time::Duration;

use heapless::Vec;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::link::{HELLO_BURST, HELLO_GAP_MS, MAX_PAYLOAD};
use crate::link::frame::{Frame, FrameError, FrameType};
use crate::radio::traits::{Radio, RadioError};

/// Errors surfaced to the bridge loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The radio raised its sticky fault flag
    #[error("radio fault")]
    Fault,
    /// The radio did not finish a transmission in time
    #[error("radio operation timed out")]
    Timeout,
    /// Payload cannot fit one frame
    #[error("payload too long for one frame")]
    PayloadTooLong,
}

/// Counters accumulated since the link was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Data frames handed to the radio
    pub transmitted: u32,
    /// Data frames accepted and delivered upward
    pub received: u32,
    /// Packets the modem rejected on its payload CRC
    pub crc_errors: u32,
    /// Frames that failed the XOR trailer
    pub checksum_errors: u32,
    /// Frames too short, of unknown type, or otherwise undecodable
    pub junk_frames: u32,
    /// Sum of sequence gaps observed on accepted data frames
    pub estimated_dropped: u32,
}

/// Framing and sequence tracking over one radio
pub struct LinkLayer<R: Radio> {
    radio: R,
    /// Sequence number the next outgoing frame will carry
    next_seq: u8,
    /// Last sequence number accepted from the peer
    last_peer_seq: u8,
    /// False until the first data frame after creation or a hello
    have_received: bool,
    stats: LinkStats,
}

impl<R: Radio> LinkLayer<R> {
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            next_seq: 0,
            last_peer_seq: 0xff,
            have_received: false,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Direct radio access, used by the bridge for fault recovery
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Send one data frame.
    ///
    /// The sequence number advances whether or not the radio accepts
    /// the frame, so the receiver's gap accounting reflects every
    /// attempt.
    pub fn transmit(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let frame = Frame::new(FrameType::Data, self.next_seq, self.last_peer_seq, payload)
            .map_err(|_| LinkError::PayloadTooLong)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        let bytes = frame.encode();
        debug!(
            "link tx seq={} {} bytes, ~{} ms on air",
            frame.seq,
            bytes.len(),
            self.radio.time_on_air_ms(bytes.len())
        );
        match self.radio.transmit(&bytes) {
            Ok(()) => {
                self.stats.transmitted += 1;
                Ok(())
            }
            Err(RadioError::Timeout) => Err(LinkError::Timeout),
            Err(RadioError::PayloadTooLong) => Err(LinkError::PayloadTooLong),
            Err(_) => Err(LinkError::Fault),
        }
    }

    /// Announce on the channel with a short burst of hello frames.
    ///
    /// A peer that hears any one of them resets its tracking of our
    /// counter, so a restart does not masquerade as massive frame loss.
    /// Each hello consumes a sequence number like any other frame.
    pub fn send_hello(&mut self) -> Result<(), LinkError> {
        info!("announcing with {} hello frames", HELLO_BURST);
        for n in 0..HELLO_BURST {
            let mut payload: Vec<u8, 6> = Vec::new();
            let _ = payload.extend_from_slice(b"hello");
            let _ = payload.push(b'0' + n as u8);
            let frame = Frame::new(FrameType::Hello, self.next_seq, 0xff, &payload)
                .map_err(|_| LinkError::PayloadTooLong)?;
            self.next_seq = self.next_seq.wrapping_add(1);
            match self.radio.transmit(&frame.encode()) {
                Ok(()) | Err(RadioError::Timeout) => {}
                Err(_) => return Err(LinkError::Fault),
            }
            thread::sleep(Duration::from_millis(HELLO_GAP_MS));
        }
        Ok(())
    }

    /// One listen attempt, processing at most one radio packet.
    ///
    /// Blocks for at most `timeout_ms`; on a real modem the symbol
    /// timeout ends an idle listen well before that ceiling. Returns
    /// `Ok(Some(payload))` for a data frame and `Ok(None)` when the
    /// attempt ended without one (idle channel, CRC failure, checksum
    /// mismatch, junk or hello). Callers drive the overall listen
    /// budget, so any lock held around this call is released between
    /// attempts and a writer is never starved for a whole budget.
    pub fn try_receive(
        &mut self,
        timeout_ms: u32,
    ) -> Result<Option<Vec<u8, MAX_PAYLOAD>>, LinkError> {
        let packet = match self.radio.receive(timeout_ms) {
            Ok(packet) => packet,
            Err(RadioError::Timeout) => return Ok(None),
            Err(RadioError::Crc) => {
                self.stats.crc_errors += 1;
                return Ok(None);
            }
            Err(_) => return Err(LinkError::Fault),
        };
        match Frame::decode(&packet.data) {
            Ok(frame) => match frame.kind {
                FrameType::Data => {
                    self.stats.received += 1;
                    self.note_sequence(frame.seq);
                    return Ok(Some(frame.payload));
                }
                FrameType::Hello => {
                    info!("peer announced, counter {}", frame.seq);
                    self.last_peer_seq = frame.seq;
                    self.have_received = false;
                }
                FrameType::Ack => {
                    // Nothing sends these yet
                    self.stats.junk_frames += 1;
                }
            },
            Err(FrameError::Checksum { computed, received }) => {
                warn!(
                    "frame checksum mismatch ({:#04x} != {:#04x})",
                    computed, received
                );
                self.stats.checksum_errors += 1;
            }
            Err(_) => {
                self.stats.junk_frames += 1;
            }
        }
        Ok(None)
    }

    /// Update peer tracking for an accepted data frame and account for
    /// any gap since the previous one.
    fn note_sequence(&mut self, seq: u8) {
        if self.have_received {
            let expected = self.last_peer_seq.wrapping_add(1);
            if seq != expected {
                let gap = u32::from(seq.wrapping_sub(expected));
                warn!(
                    "sequence gap: expected {}, got {}, ~{} frames lost",
                    expected, seq, gap
                );
                self.stats.estimated_dropped += gap;
            }
        } else {
            self.have_received = true;
        }
        self.last_peer_seq = seq;
    }
}
