//! Configuration constants
//!
//! Central location for tunable values: radio defaults, link framing
//! limits, MQTT-SN session parameters and bridge loop timing.

/// Default LoRa modem settings
pub mod radio_defaults {
    /// Carrier frequency in Hz
    pub const CARRIER_HZ: u32 = 919_000_000;

    /// Signal bandwidth in Hz
    pub const BANDWIDTH_HZ: u32 = 125_000;

    /// Spreading factor (chips per symbol = 2^SF)
    pub const SPREADING_FACTOR: u8 = 9;

    /// Coding rate denominator, 4/x
    pub const CODING_RATE: u8 = 6;

    /// Preamble length in symbols
    pub const PREAMBLE_SYMBOLS: u8 = 8;

    /// RX symbol timeout, 10 bits split across ModemConfig2 and SymbTimeoutLsb
    pub const SYMBOL_TIMEOUT: u16 = 366;

    /// Largest payload handed to the modem in one transmission
    pub const MAX_TX_PAYLOAD: u8 = 0x80;

    /// Largest payload accepted from the modem in one reception
    pub const MAX_RX_PAYLOAD: u8 = 0x80;
}

/// Radio driver timing
pub mod radio_timing {
    /// Settle delay after an operating mode change, in microseconds
    pub const MODE_SETTLE_US: u64 = 10_000;

    /// Delay between a register write and its verification read, in microseconds
    pub const VERIFY_DELAY_US: u64 = 100;

    /// Polling interval while waiting for TxDone, in milliseconds
    pub const TX_POLL_INTERVAL_MS: u64 = 10;

    /// Slack added to the predicted time on air before a TX is declared
    /// lost, in milliseconds
    pub const TX_DONE_MARGIN_MS: u32 = 100;

    /// Polling interval while waiting for RxDone, in microseconds
    pub const RX_POLL_INTERVAL_US: u64 = 500;
}

/// Link-layer framing
pub mod link {
    /// Maximum over-the-air frame size, bounded by the modem payload limit
    pub const MAX_FRAME_SIZE: usize = 0x80;

    /// Type, sequence and echo bytes plus the trailing checksum
    pub const FRAME_OVERHEAD: usize = 4;

    /// Maximum application payload per frame
    pub const MAX_PAYLOAD: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

    /// Number of hello frames sent when announcing on the channel
    pub const HELLO_BURST: usize = 5;

    /// Gap between hello frames, in milliseconds
    pub const HELLO_GAP_MS: u64 = 100;
}

/// MQTT-SN session parameters
pub mod mqttsn {
    /// Protocol identifier carried in CONNECT
    pub const PROTOCOL_ID: u8 = 0x01;

    /// Maximum encoded message size, chosen to fit a single link frame
    /// with room to spare on constrained peers
    pub const MAX_MESSAGE_SIZE: usize = 66;

    /// Maximum publish payload: message size less the 7-byte PUBLISH header
    pub const MAX_PUBLISH_DATA: usize = MAX_MESSAGE_SIZE - 7;

    /// Maximum topic name length
    pub const MAX_TOPIC_NAME: usize = 32;

    /// Maximum client identifier length
    pub const MAX_CLIENT_ID: usize = 23;

    /// Topic registry capacity
    pub const MAX_TOPICS: usize = 10;

    /// Time without a response before the last message is retransmitted,
    /// in milliseconds
    pub const RETRY_INTERVAL_MS: u64 = 15_000;

    /// Retransmissions attempted before the session is declared lost
    pub const RETRY_BUDGET: u8 = 5;
}

/// Bridge loop timing
pub mod bridge {
    /// Overall budget for one inbound listen slice, in milliseconds.
    /// Spent across many short attempts, not one blocking call.
    pub const RX_SLICE_MS: u32 = 20_000;

    /// Upper bound on a single listen attempt, in milliseconds. A
    /// safety ceiling only; the modem symbol timeout ends an idle
    /// attempt much sooner. The radio lock is held for at most one
    /// attempt at a time.
    pub const LISTEN_MS: u32 = 2_000;

    /// Pause between inbound pump iterations while the radio lock is
    /// released, in microseconds
    pub const PUMP_YIELD_US: u64 = 50;

    /// Datagram receive buffer size
    pub const UDP_BUFFER: usize = 512;
}
