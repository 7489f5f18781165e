//! Radio abstraction traits
//!
//! Two seams, mirroring the two places a fake is useful in tests:
//! [`RegisterTransport`] sits below the driver and stands in for the SPI
//! bus, while [`Radio`] sits above it and stands in for the whole modem
//! when exercising the link layer and the bridge.

use thiserror::Error;

use crate::config::{link::MAX_FRAME_SIZE, radio_defaults};

/// Errors raised by the register bus itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The register read did not complete
    #[error("register read failed")]
    Read,
    /// The register write did not complete
    #[error("register write failed")]
    Write,
}

/// Byte-level access to the modem's register file.
///
/// The bus is assumed to be unreliable: reads may fail outright and
/// writes may not take effect, so the driver verifies every write it
/// can. `write_register` returns the byte clocked back during the
/// write, which on SPI is the register's previous value.
pub trait RegisterTransport {
    /// Read a single register
    fn read_register(&mut self, addr: u8) -> Result<u8, TransportError>;

    /// Write a single register, returning the echoed byte
    fn write_register(&mut self, addr: u8, value: u8) -> Result<u8, TransportError>;
}

/// Errors surfaced by a [`Radio`] implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The transport or the chip stopped responding coherently
    #[error("radio hardware fault")]
    Fault,
    /// No TxDone or RxDone within the allotted time
    #[error("radio operation timed out")]
    Timeout,
    /// A packet arrived but its payload CRC check failed
    #[error("payload CRC check failed")]
    Crc,
    /// The requested modem settings are not representable
    #[error("invalid radio configuration")]
    InvalidConfig,
    /// The payload does not fit the configured maximum
    #[error("payload too long for one transmission")]
    PayloadTooLong,
}

/// Modem settings applied as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Carrier frequency in Hz
    pub carrier_hz: u32,
    /// Signal bandwidth in Hz; must be one of the modem's discrete steps
    pub bandwidth_hz: u32,
    /// Spreading factor, 6..=12
    pub spreading_factor: u8,
    /// Coding rate denominator, 5..=8 for 4/5..4/8
    pub coding_rate: u8,
    /// Preamble length in symbols
    pub preamble_symbols: u8,
    /// RX symbol timeout, at most 0x3ff
    pub symbol_timeout: u16,
    /// Largest payload accepted for transmission
    pub max_tx_payload: u8,
    /// Largest payload accepted on reception
    pub max_rx_payload: u8,
    /// Drive the PA_BOOST output at full power
    pub high_power: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            carrier_hz: radio_defaults::CARRIER_HZ,
            bandwidth_hz: radio_defaults::BANDWIDTH_HZ,
            spreading_factor: radio_defaults::SPREADING_FACTOR,
            coding_rate: radio_defaults::CODING_RATE,
            preamble_symbols: radio_defaults::PREAMBLE_SYMBOLS,
            symbol_timeout: radio_defaults::SYMBOL_TIMEOUT,
            max_tx_payload: radio_defaults::MAX_TX_PAYLOAD,
            max_rx_payload: radio_defaults::MAX_RX_PAYLOAD,
            high_power: false,
        }
    }
}

/// A packet received from the modem with its signal metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    /// Payload bytes as reported by FifoRxNbBytes
    pub data: heapless::Vec<u8, MAX_FRAME_SIZE>,
    /// RSSI of the packet in dBm
    pub rssi_dbm: i16,
    /// SNR of the packet in dB
    pub snr_db: i8,
}

/// Half-duplex packet radio interface
pub trait Radio {
    /// Transmit one payload, blocking until TxDone or a timeout
    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError>;

    /// Wait up to `timeout_ms` for one packet
    fn receive(&mut self, timeout_ms: u32) -> Result<RxPacket, RadioError>;

    /// Predicted time on air for a payload of the given length, in
    /// milliseconds, under the current modem settings
    fn time_on_air_ms(&self, payload_len: usize) -> u32;

    /// True once the radio has observed a hardware fault; stays set
    /// until the radio is restarted
    fn fault(&self) -> bool;

    /// Reset internal state and reapply the stored configuration
    fn restart(&mut self) -> Result<(), RadioError>;
}
