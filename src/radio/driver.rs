//! SX1276 LoRa modem driver
//!
//! Register-level driver over a [`RegisterTransport`]. The bus to the
//! modem is treated as untrustworthy: every configuration write is read
//! back and retried once, reads get a second attempt, and any access
//! that still fails raises a sticky fault flag that only a restart
//! clears. Transmit and receive block, polling RegIrqFlags rather than
//! wiring up DIO interrupt lines.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::{link::MAX_FRAME_SIZE, radio_timing};
use crate::radio::registers::{self, irq, opmode};
use crate::radio::traits::{Radio, RadioConfig, RadioError, RegisterTransport, RxPacket};

/// Write attempts before a register is declared unwritable
const WRITE_ATTEMPTS: u8 = 2;

/// Read attempts before a register is declared unreadable
const READ_ATTEMPTS: u8 = 2;

/// Snapshot of chip identity and the most recent packet's signal data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioStatus {
    /// Sticky hardware fault indicator
    pub fault: bool,
    /// Silicon revision from RegVersion (0x12 for production SX1276)
    pub version: u8,
    /// Carrier frequency read back from the synthesizer, in Hz
    pub carrier_hz: u32,
    /// RSSI of the last received packet, in dBm
    pub last_rssi_dbm: i16,
    /// SNR of the last received packet, in dB
    pub last_snr_db: i8,
    /// Coding rate denominator of the last received packet, 0 if none
    pub last_coding_rate: u8,
}

/// Driver state: the transport, the settings last applied and a status
/// snapshot updated as packets flow.
pub struct Sx1276Driver<T: RegisterTransport> {
    transport: T,
    config: RadioConfig,
    status: RadioStatus,
}

impl<T: RegisterTransport> Sx1276Driver<T> {
    /// Bring up the chip over the given transport.
    ///
    /// Reads the silicon revision and the current carrier; either
    /// failing marks the driver faulted from the start.
    pub fn new(transport: T) -> Self {
        let mut driver = Self {
            transport,
            config: RadioConfig::default(),
            status: RadioStatus::default(),
        };
        if let Ok(version) = driver.read_register(registers::VERSION) {
            driver.status.version = version;
            info!("SX1276 silicon revision {:#04x}", version);
        }
        let _ = driver.read_carrier();
        driver
    }

    /// Settings currently applied to the modem
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Chip identity and last-packet signal data
    pub fn status(&self) -> RadioStatus {
        self.status
    }

    /// Carrier frequency as last read back from the synthesizer, in Hz
    pub fn carrier_hz(&self) -> u32 {
        self.status.carrier_hz
    }

    /// Put the modem to sleep, switch it to LoRa mode and apply every
    /// setting in `config`, leaving the chip in standby.
    ///
    /// Settings are validated up front so a bad value cannot leave the
    /// chip half-configured. Clears any prior fault before touching the
    /// bus; a verified standby read-back at the end confirms the chip
    /// is actually listening.
    pub fn apply_configuration(&mut self, config: &RadioConfig) -> Result<(), RadioError> {
        let bw_bits =
            registers::bandwidth_to_bitfield(config.bandwidth_hz).ok_or(RadioError::InvalidConfig)?;
        let cr_bits =
            registers::coding_rate_to_bitfield(config.coding_rate).ok_or(RadioError::InvalidConfig)?;
        if !(6..=12).contains(&config.spreading_factor) {
            return Err(RadioError::InvalidConfig);
        }
        if config.symbol_timeout > 0x3ff {
            return Err(RadioError::InvalidConfig);
        }

        self.status.fault = false;

        // Leaving FSK/OOK requires passing through sleep with the mode
        // bits cleared before the LoRa bit is honoured.
        let mode = self.read_register(registers::OP_MODE)?;
        self.write_register_verify(registers::OP_MODE, mode & opmode::MODE_CLEAR)?;
        self.settle();
        self.write_register_verify(registers::OP_MODE, opmode::LORA_SLEEP)?;
        self.settle();
        self.write_register_verify(registers::OP_MODE, opmode::LORA_STANDBY)?;
        self.settle();

        self.set_carrier(config.carrier_hz)?;

        // Overcurrent protection on, trim at the maximum
        self.write_register_verify(registers::OCP, (1 << 5) | 0x0b)?;

        let check = self.read_register(registers::OP_MODE)?;
        if check != opmode::LORA_STANDBY {
            error!("modem refused standby, RegOpMode={:#04x}", check);
            self.status.fault = true;
            return Err(RadioError::Fault);
        }

        // Explicit header mode: bit 0 of ModemConfig1 stays clear
        self.write_register_verify(registers::MODEM_CONFIG1, (bw_bits << 4) | (cr_bits << 1))?;
        self.write_register_verify(
            registers::MODEM_CONFIG2,
            (config.spreading_factor << 4) | (1 << 2) | ((config.symbol_timeout >> 8) as u8 & 0x3),
        )?;
        self.write_register_verify(registers::SYMB_TIMEOUT_LSB, (config.symbol_timeout & 0xff) as u8)?;
        self.write_register_verify(registers::PREAMBLE_MSB, 0)?;
        self.write_register_verify(registers::PREAMBLE_LSB, config.preamble_symbols)?;
        self.write_register_verify(registers::MAX_PAYLOAD_LENGTH, config.max_rx_payload)?;

        if config.high_power {
            self.write_register_verify(registers::PA_CONFIG, 0xff)?;
            self.write_register_verify(registers::PA_DAC, 0x87)?;
        } else {
            self.write_register_verify(registers::PA_CONFIG, 0x7f)?;
            self.write_register_verify(registers::PA_DAC, 0x84)?;
        }

        // DIO0 -> TxDone, DIO3 -> ValidHeader, DIO5 -> ClkOut
        self.write_register_verify(registers::DIO_MAPPING1, 0x41)?;
        self.write_register_verify(registers::DIO_MAPPING2, 0x20)?;

        self.config = config.clone();
        info!(
            "modem configured: {} Hz, bw {} Hz, sf {}, cr 4/{}",
            self.status.carrier_hz, config.bandwidth_hz, config.spreading_factor, config.coding_rate
        );
        Ok(())
    }

    /// Program the carrier synthesizer and read the result back.
    ///
    /// The 24-bit Frf word has a step of Fxosc / 2^19, about 61 Hz, so
    /// the frequency that takes effect is the requested one rounded
    /// down to the nearest step. The new value latches when the LSB is
    /// written, so the three writes go MSB first.
    pub fn set_carrier(&mut self, hz: u32) -> Result<(), RadioError> {
        let frf = ((u64::from(hz) << registers::FRF_SHIFT) + registers::FXOSC_HZ / 2)
            / registers::FXOSC_HZ;
        self.write_register_verify(registers::FRF_MSB, (frf >> 16) as u8)?;
        self.write_register_verify(registers::FRF_MID, (frf >> 8) as u8)?;
        self.write_register_verify(registers::FRF_LSB, frf as u8)?;
        let actual = self.read_carrier()?;
        debug!("carrier set: requested {} Hz, synthesized {} Hz", hz, actual);
        Ok(())
    }

    /// Recompute the carrier from the Frf registers
    pub fn read_carrier(&mut self) -> Result<u32, RadioError> {
        let msb = self.read_register(registers::FRF_MSB)?;
        let mid = self.read_register(registers::FRF_MID)?;
        let lsb = self.read_register(registers::FRF_LSB)?;
        let frf = (u64::from(msb) << 16) | (u64::from(mid) << 8) | u64::from(lsb);
        let hz = ((registers::FXOSC_HZ * frf) >> registers::FRF_SHIFT) as u32;
        self.status.carrier_hz = hz;
        Ok(hz)
    }

    /// Read with one retry. A read that fails twice marks the fault.
    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError> {
        for attempt in 0..READ_ATTEMPTS {
            match self.transport.read_register(addr) {
                Ok(value) => return Ok(value),
                Err(_) if attempt + 1 < READ_ATTEMPTS => continue,
                Err(_) => break,
            }
        }
        error!("register {:#04x} unreadable", addr);
        self.status.fault = true;
        Err(RadioError::Fault)
    }

    /// Write without verification, for registers with side effects on
    /// access (the FIFO port, RegIrqFlags).
    fn write_register_raw(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        match self.transport.write_register(addr, value) {
            Ok(_) => Ok(()),
            Err(_) => {
                error!("register {:#04x} write failed", addr);
                self.status.fault = true;
                Err(RadioError::Fault)
            }
        }
    }

    /// Write, read back and compare, retrying the whole cycle once.
    /// Two failed cycles mark the fault.
    fn write_register_verify(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        for _ in 0..WRITE_ATTEMPTS {
            if self.transport.write_register(addr, value).is_err() {
                continue;
            }
            thread::sleep(Duration::from_micros(radio_timing::VERIFY_DELAY_US));
            if let Ok(check) = self.transport.read_register(addr) {
                if check == value {
                    return Ok(());
                }
            }
        }
        error!("register {:#04x} would not hold {:#04x}", addr, value);
        self.status.fault = true;
        Err(RadioError::Fault)
    }

    fn settle(&self) {
        thread::sleep(Duration::from_micros(radio_timing::MODE_SETTLE_US));
    }
}

impl<T: RegisterTransport> Radio for Sx1276Driver<T> {
    /// Load the FIFO and transmit, blocking until TxDone.
    ///
    /// The FIFO port cannot be read back, so the burst is checked
    /// indirectly: after the payload is clocked in, FifoAddrPtr must
    /// have advanced by exactly the payload length. The wait deadline
    /// is the predicted time on air plus a fixed margin.
    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.is_empty() || payload.len() > self.config.max_tx_payload as usize {
            return Err(RadioError::PayloadTooLong);
        }

        self.write_register_verify(registers::OP_MODE, opmode::LORA_STANDBY)?;
        self.settle();

        // TX FIFO occupies the top of the 256-byte buffer
        let base = (0xffu16 - u16::from(self.config.max_tx_payload) + 1) as u8;
        self.write_register_verify(registers::FIFO_TX_BASE_ADDR, base)?;
        self.write_register_verify(registers::FIFO_ADDR_PTR, base)?;
        self.write_register_verify(registers::PAYLOAD_LENGTH, payload.len() as u8)?;
        for byte in payload {
            self.write_register_raw(registers::FIFO, *byte)?;
        }
        let ptr = self.read_register(registers::FIFO_ADDR_PTR)?;
        if ptr != base.wrapping_add(payload.len() as u8) {
            error!(
                "FIFO fill lost bytes: pointer at {:#04x} after {} bytes from {:#04x}",
                ptr,
                payload.len(),
                base
            );
            self.status.fault = true;
            return Err(RadioError::Fault);
        }

        self.write_register_verify(registers::IRQ_FLAGS_MASK, irq::MASK_TX)?;
        self.write_register_raw(registers::IRQ_FLAGS, irq::CLEAR_ALL)?;

        let toa = self.time_on_air_ms(payload.len());
        debug!("tx {} bytes, predicted {} ms on air", payload.len(), toa);
        self.write_register_verify(registers::OP_MODE, opmode::LORA_TX)?;

        let deadline =
            Instant::now() + Duration::from_millis(u64::from(toa + radio_timing::TX_DONE_MARGIN_MS));
        loop {
            let flags = self.read_register(registers::IRQ_FLAGS)?;
            if flags & irq::TX_DONE != 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("TxDone never fired within {} ms margin", radio_timing::TX_DONE_MARGIN_MS);
                return Err(RadioError::Timeout);
            }
            thread::sleep(Duration::from_millis(radio_timing::TX_POLL_INTERVAL_MS));
        }
    }

    /// Single-shot receive, blocking up to `timeout_ms`.
    ///
    /// The modem's own symbol timeout ends each listen much earlier;
    /// `timeout_ms` is the caller's overall budget. Signal metadata is
    /// recorded in the status snapshot even for packets that fail the
    /// payload CRC check.
    fn receive(&mut self, timeout_ms: u32) -> Result<RxPacket, RadioError> {
        self.write_register_verify(registers::OP_MODE, opmode::LORA_STANDBY)?;
        self.settle();

        // Maximum LNA gain
        self.write_register_verify(registers::LNA, 0x1 << 5)?;
        self.write_register_verify(registers::MAX_PAYLOAD_LENGTH, self.config.max_rx_payload)?;
        self.write_register_verify(registers::PAYLOAD_LENGTH, self.config.max_rx_payload)?;
        self.write_register_verify(registers::FIFO_RX_BASE_ADDR, 0x00)?;
        self.write_register_verify(registers::FIFO_ADDR_PTR, 0x00)?;
        self.write_register_verify(registers::IRQ_FLAGS_MASK, irq::MASK_RX)?;
        self.write_register_raw(registers::IRQ_FLAGS, irq::CLEAR_ALL)?;
        self.write_register_verify(registers::OP_MODE, opmode::LORA_RX_SINGLE)?;

        let deadline = Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        let flags = loop {
            let flags = self.read_register(registers::IRQ_FLAGS)?;
            if flags & irq::RX_DONE != 0 {
                break flags;
            }
            if flags & irq::RX_TIMEOUT != 0 {
                return Err(RadioError::Timeout);
            }
            if Instant::now() >= deadline {
                return Err(RadioError::Timeout);
            }
            thread::sleep(Duration::from_micros(radio_timing::RX_POLL_INTERVAL_US));
        };

        let rssi_raw = self.read_register(registers::PACKET_RSSI)?;
        let snr_raw = self.read_register(registers::PACKET_SNR)?;
        let stat = self.read_register(registers::MODEM_STAT)?;
        self.status.last_rssi_dbm = -137 + i16::from(rssi_raw);
        // PacketSnr is a two's complement quarter-dB count
        self.status.last_snr_db = (snr_raw as i8) / 4;
        self.status.last_coding_rate = registers::coding_rate_from_modem_stat(stat);

        if flags & irq::PAYLOAD_CRC_ERROR != 0 {
            warn!(
                "packet failed payload CRC, rssi {} dBm",
                self.status.last_rssi_dbm
            );
            return Err(RadioError::Crc);
        }

        let count = self.read_register(registers::FIFO_RX_NB_BYTES)?;
        let start = self.read_register(registers::FIFO_RX_CURRENT_ADDR)?;
        self.write_register_verify(registers::FIFO_ADDR_PTR, start)?;
        let mut data = heapless::Vec::<u8, MAX_FRAME_SIZE>::new();
        for _ in 0..count {
            let byte = self.read_register(registers::FIFO)?;
            if data.push(byte).is_err() {
                // FifoRxNbBytes claimed more than the configured maximum
                self.status.fault = true;
                return Err(RadioError::Fault);
            }
        }
        debug!(
            "rx {} bytes, rssi {} dBm, snr {} dB, cr 4/{}",
            count, self.status.last_rssi_dbm, self.status.last_snr_db, self.status.last_coding_rate
        );
        Ok(RxPacket {
            data,
            rssi_dbm: self.status.last_rssi_dbm,
            snr_db: self.status.last_snr_db,
        })
    }

    /// Predicted time on air in milliseconds under the current settings.
    ///
    /// Integer form of the LoRa airtime formula: the payload symbol
    /// count rounds up before the coding rate multiplies it, and
    /// preamble and payload durations scale by 2^SF / BW.
    fn time_on_air_ms(&self, payload_len: usize) -> u32 {
        let sf = i64::from(self.config.spreading_factor);
        let bw = i64::from(self.config.bandwidth_hz);
        let numerator = 8 * payload_len as i64 - 4 * sf + 28 + 16;
        let denominator = 4 * sf;
        let mut symbols = if numerator > 0 {
            (numerator + denominator - 1) / denominator
        } else {
            0
        };
        symbols *= i64::from(self.config.coding_rate);
        symbols += 8;
        let symbol_scale = 1i64 << sf;
        let preamble_ms = (1000 * i64::from(self.config.preamble_symbols) + 4250) * symbol_scale / bw;
        let payload_ms = 1000 * symbols * symbol_scale / bw;
        (preamble_ms + payload_ms) as u32
    }

    fn fault(&self) -> bool {
        self.status.fault
    }

    /// Reapply the stored configuration from scratch. Clears the fault
    /// flag if the chip comes back.
    fn restart(&mut self) -> Result<(), RadioError> {
        info!("restarting modem");
        let config = self.config.clone();
        self.apply_configuration(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::traits::mock::FakeChip;

    fn configured_driver(chip: &FakeChip) -> Sx1276Driver<FakeChip> {
        let mut driver = Sx1276Driver::new(chip.clone());
        driver.apply_configuration(&RadioConfig::default()).unwrap();
        driver
    }

    #[test]
    fn startup_reads_version_and_carrier() {
        let chip = FakeChip::new();
        let driver = Sx1276Driver::new(chip);
        assert_eq!(driver.status().version, 0x12);
        assert_eq!(driver.carrier_hz(), 434_000_000);
        assert!(!driver.fault());
    }

    #[test]
    fn configuration_programs_modem_registers() {
        let chip = FakeChip::new();
        let driver = configured_driver(&chip);

        // bw 125 kHz (0x7), cr 4/6 (0x2), explicit header
        assert_eq!(chip.register(registers::MODEM_CONFIG1), (0x7 << 4) | (0x2 << 1));
        // sf 9, CRC on, symbol timeout 366 = 0x16e
        assert_eq!(chip.register(registers::MODEM_CONFIG2), (9 << 4) | (1 << 2) | 0x1);
        assert_eq!(chip.register(registers::SYMB_TIMEOUT_LSB), 0x6e);
        assert_eq!(chip.register(registers::OP_MODE), opmode::LORA_STANDBY);
        // 919 MHz rounds to an exact synthesizer step
        assert_eq!(driver.carrier_hz(), 919_000_000);
        assert_eq!(chip.register(registers::FRF_MSB), 0xe5);
        assert_eq!(chip.register(registers::FRF_MID), 0xc0);
        assert_eq!(chip.register(registers::FRF_LSB), 0x00);
    }

    #[test]
    fn invalid_settings_rejected_before_any_write() {
        let chip = FakeChip::new();
        let mut driver = Sx1276Driver::new(chip.clone());

        let bad_bw = RadioConfig { bandwidth_hz: 100_000, ..RadioConfig::default() };
        assert_eq!(driver.apply_configuration(&bad_bw), Err(RadioError::InvalidConfig));

        let bad_sf = RadioConfig { spreading_factor: 13, ..RadioConfig::default() };
        assert_eq!(driver.apply_configuration(&bad_sf), Err(RadioError::InvalidConfig));

        let bad_timeout = RadioConfig { symbol_timeout: 0x400, ..RadioConfig::default() };
        assert_eq!(driver.apply_configuration(&bad_timeout), Err(RadioError::InvalidConfig));

        assert_eq!(chip.register(registers::MODEM_CONFIG1), 0);
        assert!(!driver.fault());
    }

    #[test]
    fn transmit_places_payload_in_fifo() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        driver.transmit(b"hello radio").unwrap();
        assert_eq!(chip.tx_frames(), vec![b"hello radio".to_vec()]);
        assert!(!driver.fault());
    }

    #[test]
    fn transmit_rejects_oversized_payload() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        let oversized = [0u8; 0x81];
        assert_eq!(driver.transmit(&oversized), Err(RadioError::PayloadTooLong));
        assert_eq!(driver.transmit(&[]), Err(RadioError::PayloadTooLong));
    }

    #[test]
    fn stuck_register_faults_after_retries() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        chip.stick_register(registers::OP_MODE);
        assert_eq!(driver.transmit(b"x"), Err(RadioError::Fault));
        assert!(driver.fault());
        // Fault is sticky until a restart succeeds
        assert!(driver.fault());
    }

    #[test]
    fn transient_read_failure_is_retried() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        chip.fail_reads(1);
        driver.set_carrier(868_000_000).unwrap();
        assert!(!driver.fault());
        // 868 MHz is an exact synthesizer step
        assert_eq!(driver.carrier_hz(), 868_000_000);
    }

    #[test]
    fn carrier_round_trips_through_synthesizer_steps() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        // 919 MHz is an exact multiple of the 61.035 Hz step
        driver.set_carrier(919_000_000).unwrap();
        assert_eq!(driver.carrier_hz(), 919_000_000);
        // Arbitrary frequencies land within half a step of the request
        driver.set_carrier(915_123_456).unwrap();
        let actual = i64::from(driver.carrier_hz());
        assert!((actual - 915_123_456).abs() < 32);
    }

    #[test]
    fn receive_returns_payload_and_signal_data() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        // raw RSSI 47 -> -90 dBm, raw SNR 28 -> 7 dB
        chip.queue_rx(b"ping", 47, 28);
        let packet = driver.receive(1_000).unwrap();
        assert_eq!(packet.data.as_slice(), b"ping");
        assert_eq!(packet.rssi_dbm, -90);
        assert_eq!(packet.snr_db, 7);
        assert_eq!(driver.status().last_coding_rate, 6);
    }

    #[test]
    fn receive_negative_snr_decodes() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        // -6.25 dB is -25 quarter-dB, 0xe7 as two's complement
        chip.queue_rx(b"weak", 30, 0xe7);
        let packet = driver.receive(1_000).unwrap();
        assert_eq!(packet.snr_db, -6);
    }

    #[test]
    fn receive_crc_failure_reported_not_delivered() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        chip.queue_rx_crc_error(b"garbled");
        assert_eq!(driver.receive(1_000), Err(RadioError::Crc));
        // A CRC failure is a channel condition, not a hardware fault
        assert!(!driver.fault());
    }

    #[test]
    fn receive_empty_channel_times_out() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        assert_eq!(driver.receive(50), Err(RadioError::Timeout));
        assert!(!driver.fault());
    }

    #[test]
    fn restart_clears_fault_and_reconfigures() {
        let chip = FakeChip::new();
        let mut driver = configured_driver(&chip);
        chip.stick_register(registers::LNA);
        assert_eq!(driver.receive(50), Err(RadioError::Fault));
        assert!(driver.fault());
        // LNA is only touched on receive, so reconfiguration succeeds
        driver.restart().unwrap();
        assert!(!driver.fault());
        assert_eq!(chip.register(registers::OP_MODE), opmode::LORA_STANDBY);
    }

    #[test]
    fn time_on_air_known_value() {
        let chip = FakeChip::new();
        let driver = configured_driver(&chip);
        // sf 9, bw 125 kHz, cr 4/6, preamble 8: 12 bytes is 26 payload
        // symbols, 50 ms preamble + 106 ms payload
        assert_eq!(driver.time_on_air_ms(12), 156);
    }

    #[test]
    fn time_on_air_monotonic_in_length() {
        let chip = FakeChip::new();
        let driver = configured_driver(&chip);
        let mut previous = 0;
        for len in 0..=128 {
            let toa = driver.time_on_air_ms(len);
            assert!(toa >= previous, "len {} shrank the airtime", len);
            previous = toa;
        }
    }
}
