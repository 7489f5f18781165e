//! Point-to-point MQTT-SN over a raw LoRa link.
//!
//! Three layers, each usable on its own:
//!
//! - [`radio`]: a blocking SX1276 driver over an untrustworthy register
//!   bus, with write verification and a sticky fault flag.
//! - [`link`]: sequence-numbered frames with an XOR trailer and
//!   loss-estimation counters; no retransmission.
//! - [`mqttsn`]: an MQTT-SN v1.2 endpoint with a single outstanding
//!   request discipline and caller-driven retransmission.
//!
//! [`bridge`] ties a link to a UDP socket with two pump threads, so
//! ordinary datagram software can talk across the radio.

pub mod bridge;
pub mod config;
pub mod link;
pub mod mqttsn;
pub mod radio;

pub use bridge::{Bridge, BridgeConfig, BridgeError};
pub use link::{LinkError, LinkLayer, LinkStats};
pub use mqttsn::{EngineConfig, Event, MessageEngine, MessageSink};
pub use radio::{Radio, RadioConfig, RadioError, RadioStatus, RegisterTransport, Sx1276Driver};
