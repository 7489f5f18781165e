//! SX1276 register map and bitfield conversions
//!
//! Register names and addresses follow the SX1276/77/78/79 datasheet,
//! LoRa mode. Only the registers this driver touches are listed.

pub const FIFO: u8 = 0x00;
pub const OP_MODE: u8 = 0x01;
pub const FRF_MSB: u8 = 0x06;
pub const FRF_MID: u8 = 0x07;
pub const FRF_LSB: u8 = 0x08;
pub const PA_CONFIG: u8 = 0x09;
pub const OCP: u8 = 0x0b;
pub const LNA: u8 = 0x0c;
pub const FIFO_ADDR_PTR: u8 = 0x0d;
pub const FIFO_TX_BASE_ADDR: u8 = 0x0e;
pub const FIFO_RX_BASE_ADDR: u8 = 0x0f;
pub const FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const IRQ_FLAGS_MASK: u8 = 0x11;
pub const IRQ_FLAGS: u8 = 0x12;
pub const FIFO_RX_NB_BYTES: u8 = 0x13;
pub const MODEM_STAT: u8 = 0x18;
pub const PACKET_SNR: u8 = 0x19;
pub const PACKET_RSSI: u8 = 0x1a;
pub const RSSI: u8 = 0x1b;
pub const MODEM_CONFIG1: u8 = 0x1d;
pub const MODEM_CONFIG2: u8 = 0x1e;
pub const SYMB_TIMEOUT_LSB: u8 = 0x1f;
pub const PREAMBLE_MSB: u8 = 0x20;
pub const PREAMBLE_LSB: u8 = 0x21;
pub const PAYLOAD_LENGTH: u8 = 0x22;
pub const MAX_PAYLOAD_LENGTH: u8 = 0x23;
pub const FIFO_RX_BYTE_ADDR_PTR: u8 = 0x25;
pub const DIO_MAPPING1: u8 = 0x40;
pub const DIO_MAPPING2: u8 = 0x41;
pub const VERSION: u8 = 0x42;
pub const PA_DAC: u8 = 0x4d;

/// RegOpMode values with the LoRa long-range bit set
pub mod opmode {
    pub const LORA_SLEEP: u8 = 0x80;
    pub const LORA_STANDBY: u8 = 0x81;
    pub const LORA_TX: u8 = 0x83;
    pub const LORA_RX_SINGLE: u8 = 0x86;

    /// Mask that clears the device mode bits while preserving the rest
    pub const MODE_CLEAR: u8 = 0xf8;
}

/// RegIrqFlags bits
pub mod irq {
    pub const TX_DONE: u8 = 1 << 3;
    pub const VALID_HEADER: u8 = 1 << 4;
    pub const PAYLOAD_CRC_ERROR: u8 = 1 << 5;
    pub const RX_DONE: u8 = 1 << 6;
    pub const RX_TIMEOUT: u8 = 1 << 7;

    /// Mask leaving only TxDone unmasked
    pub const MASK_TX: u8 = 0xf7;

    /// Mask leaving the four RX-related interrupts unmasked
    pub const MASK_RX: u8 = 0x0f;

    /// Writing ones clears every flag
    pub const CLEAR_ALL: u8 = 0xff;
}

/// Oscillator frequency the carrier synthesizer divides down from
pub const FXOSC_HZ: u64 = 32_000_000;

/// Frf register resolution: carrier = Frf * FXOSC / 2^19
pub const FRF_SHIFT: u32 = 19;

/// Convert a bandwidth in Hz to the ModemConfig1 bitfield.
///
/// Only the discrete bandwidths the modem supports are accepted.
pub fn bandwidth_to_bitfield(hz: u32) -> Option<u8> {
    match hz {
        7_800 => Some(0x0),
        10_400 => Some(0x1),
        15_600 => Some(0x2),
        20_800 => Some(0x3),
        31_250 => Some(0x4),
        41_700 => Some(0x5),
        62_500 => Some(0x6),
        125_000 => Some(0x7),
        250_000 => Some(0x8),
        500_000 => Some(0x9),
        _ => None,
    }
}

/// Inverse of [`bandwidth_to_bitfield`], for reading configuration back.
pub fn bitfield_to_bandwidth(bits: u8) -> Option<u32> {
    match bits {
        0x0 => Some(7_800),
        0x1 => Some(10_400),
        0x2 => Some(15_600),
        0x3 => Some(20_800),
        0x4 => Some(31_250),
        0x5 => Some(41_700),
        0x6 => Some(62_500),
        0x7 => Some(125_000),
        0x8 => Some(250_000),
        0x9 => Some(500_000),
        _ => None,
    }
}

/// Convert a coding rate denominator (4/5 .. 4/8) to the ModemConfig1
/// bitfield.
pub fn coding_rate_to_bitfield(denominator: u8) -> Option<u8> {
    match denominator {
        5 => Some(0x1),
        6 => Some(0x2),
        7 => Some(0x3),
        8 => Some(0x4),
        _ => None,
    }
}

/// Decode the coding rate of the most recent packet from RegModemStat.
/// Returns the denominator of 4/x, or 0 when the field is unpopulated.
pub fn coding_rate_from_modem_stat(stat: u8) -> u8 {
    match stat >> 5 {
        0x1 => 5,
        0x2 => 6,
        0x3 => 7,
        0x4 => 8,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_bitfields_round_trip() {
        for hz in [
            7_800u32, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
        ] {
            let bits = bandwidth_to_bitfield(hz).unwrap();
            assert_eq!(bitfield_to_bandwidth(bits), Some(hz));
        }
    }

    #[test]
    fn unsupported_bandwidth_rejected() {
        assert_eq!(bandwidth_to_bitfield(100_000), None);
        assert_eq!(bandwidth_to_bitfield(0), None);
        assert_eq!(bitfield_to_bandwidth(0xa), None);
    }

    #[test]
    fn coding_rate_bitfields() {
        assert_eq!(coding_rate_to_bitfield(5), Some(0x1));
        assert_eq!(coding_rate_to_bitfield(8), Some(0x4));
        assert_eq!(coding_rate_to_bitfield(4), None);
        assert_eq!(coding_rate_to_bitfield(9), None);
    }

    #[test]
    fn modem_stat_coding_rate() {
        assert_eq!(coding_rate_from_modem_stat(0x2 << 5), 6);
        assert_eq!(coding_rate_from_modem_stat(0x00), 0);
        assert_eq!(coding_rate_from_modem_stat(0x7 << 5), 0);
    }
}
