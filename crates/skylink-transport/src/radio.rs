//! # Radio configuration side-channel
//!
//! Range-checked setters for the transceiver's carrier frequency, transmit
//! power, bitrate, preamble and sync word, written through a
//! [`RegisterBus`]. No protocol logic lives here: the link only needs the
//! peer to agree on these values.
//!
//! Invalid input is rejected before any register is touched.

use serde::Serialize;
use thiserror::Error;

use crate::error::TransportError;

/// Register map of the transceiver (subset used here).
pub mod reg {
    pub const OPERATING_MODE: u8 = 0x07;
    pub const PREAMBLE_LEN: u8 = 0x34;
    pub const SYNC_WORD_3: u8 = 0x36;
    pub const SYNC_WORD_2: u8 = 0x37;
    pub const SYNC_WORD_1: u8 = 0x38;
    pub const SYNC_WORD_0: u8 = 0x39;
    pub const TX_PKT_LEN: u8 = 0x3E;
    pub const TX_POWER: u8 = 0x6D;
    pub const TX_DATA_RATE_1: u8 = 0x6E;
    pub const TX_DATA_RATE_0: u8 = 0x6F;
    pub const MOD_MODE_1: u8 = 0x70;
    pub const MOD_MODE_2: u8 = 0x71;
    pub const FREQ_OFFSET_1: u8 = 0x73;
    pub const FREQ_OFFSET_2: u8 = 0x74;
    pub const FREQ_BAND_SEL: u8 = 0x75;
    pub const NOM_CARRIER_1: u8 = 0x76;
    pub const NOM_CARRIER_0: u8 = 0x77;
}

/// Write flag OR-ed into the register address of an SPI write burst.
pub const SPI_WRITE: u8 = 0x80;

/// ISM band limits, kHz.
pub const MIN_FREQUENCY_KHZ: u32 = 433_050;
pub const MAX_FREQUENCY_KHZ: u32 = 434_790;

pub const MIN_BITRATE_BPS: u32 = 1_000;
pub const MAX_BITRATE_BPS: u32 = 256_000;

/// Legal transmit power levels, dBm, with their register codes.
pub const POWER_LEVELS_DBM: [i32; 7] = [-8, -5, -2, 1, 4, 7, 10];

const BAND_FB: u8 = 19;
const BAND_SIDEBAND: u8 = 0x40;
const TX_DR_SCALE: u8 = 1 << 5;
const LOW_RATE_LIMIT_BPS: u32 = 30_000;
const MOD_FIFO_FSK: u8 = 0x22;
const MODE_READY: u8 = 0x01;
const MODE_RX: u8 = 0x04;
const MODE_TX: u8 = 0x08;

/// Two-byte SPI write command for `reg`.
pub fn write_command(reg: u8, value: u8) -> [u8; 2] {
    [SPI_WRITE | reg, value]
}

/// Register access to one transceiver.
pub trait RegisterBus {
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), TransportError>;
    fn read_register(&mut self, reg: u8) -> Result<u8, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("frequency {0} kHz outside 433050..=434790 kHz")]
    FrequencyOutOfRange(u32),
    #[error("bitrate {0} bps outside 1000..=256000 bps")]
    BitrateOutOfRange(u32),
    #[error("register bus: {0}")]
    Bus(#[from] TransportError),
}

/// Transceiver operating direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Receive,
    Transmit,
}

// ─── Settings ───────────────────────────────────────────────────────────────

/// A complete radio parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RadioSettings {
    pub frequency_khz: u32,
    pub power_dbm: i32,
    pub bitrate_bps: u32,
    pub preamble_nibbles: u8,
    pub sync_word: u32,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency_khz: MIN_FREQUENCY_KHZ,
            power_dbm: 10,
            bitrate_bps: 10_000,
            preamble_nibbles: 8,
            sync_word: 0x2DD4_0000,
        }
    }
}

impl RadioSettings {
    pub fn validate(&self) -> Result<(), RadioError> {
        check_frequency(self.frequency_khz)?;
        check_bitrate(self.bitrate_bps)?;
        Ok(())
    }

    /// Write every setting to `radio`.
    pub fn apply<B: RegisterBus>(&self, radio: &mut Radio<B>) -> Result<(), RadioError> {
        self.validate()?;
        radio.set_frequency(self.frequency_khz)?;
        radio.set_power(self.power_dbm)?;
        radio.set_bitrate(self.bitrate_bps)?;
        radio.set_preamble_length(self.preamble_nibbles)?;
        radio.set_sync_word(self.sync_word)?;
        Ok(())
    }
}

fn check_frequency(khz: u32) -> Result<(), RadioError> {
    if (MIN_FREQUENCY_KHZ..=MAX_FREQUENCY_KHZ).contains(&khz) {
        Ok(())
    } else {
        Err(RadioError::FrequencyOutOfRange(khz))
    }
}

fn check_bitrate(bps: u32) -> Result<(), RadioError> {
    if (MIN_BITRATE_BPS..=MAX_BITRATE_BPS).contains(&bps) {
        Ok(())
    } else {
        Err(RadioError::BitrateOutOfRange(bps))
    }
}

/// Round `dbm` down to a legal level; returns `(level, register code)`.
pub fn quantize_power(dbm: i32) -> (i32, u8) {
    let idx = POWER_LEVELS_DBM
        .iter()
        .rposition(|&level| level <= dbm)
        .unwrap_or(0);
    (POWER_LEVELS_DBM[idx], idx as u8)
}

/// Nominal carrier word for band 19 with zero offset, or `None` when `khz`
/// falls outside what the word can express.
pub fn carrier_word(khz: u32) -> Option<u16> {
    let offset = u64::from(khz.checked_sub(430_000)?);
    u16::try_from(offset * 32 / 5).ok()
}

/// Data rate register word and whether the low-rate scale bit is needed.
pub fn data_rate_word(bps: u32) -> (u16, bool) {
    let low = bps < LOW_RATE_LIMIT_BPS;
    let scale: u64 = if low { 1 << 21 } else { 1 << 16 };
    ((u64::from(bps) * scale / 1_000_000) as u16, low)
}

// ─── Radio ──────────────────────────────────────────────────────────────────

/// A transceiver plus the values last applied to it.
pub struct Radio<B> {
    bus: B,
    applied: RadioSettings,
    packet_len: Option<u8>,
}

impl<B: RegisterBus> Radio<B> {
    /// Wrap a bus. The recorded settings start at the defaults, which is
    /// what [`RadioSettings::apply`] is expected to establish.
    pub fn new(bus: B) -> Self {
        Radio {
            bus,
            applied: RadioSettings::default(),
            packet_len: None,
        }
    }

    pub fn settings(&self) -> &RadioSettings {
        &self.applied
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    pub fn set_frequency(&mut self, khz: u32) -> Result<(), RadioError> {
        check_frequency(khz)?;
        let fc = carrier_word(khz)
            .ok_or(RadioError::FrequencyOutOfRange(khz))?
            .to_be_bytes();
        self.bus.write_register(reg::FREQ_BAND_SEL, BAND_SIDEBAND | BAND_FB)?;
        self.bus.write_register(reg::FREQ_OFFSET_1, 0)?;
        self.bus.write_register(reg::FREQ_OFFSET_2, 0)?;
        self.bus.write_register(reg::NOM_CARRIER_1, fc[0])?;
        self.bus.write_register(reg::NOM_CARRIER_0, fc[1])?;
        self.applied.frequency_khz = khz;
        tracing::debug!(khz, "radio frequency set");
        Ok(())
    }

    /// Returns the level actually applied.
    pub fn set_power(&mut self, dbm: i32) -> Result<i32, RadioError> {
        let (level, code) = quantize_power(dbm);
        self.bus.write_register(reg::TX_POWER, code)?;
        self.applied.power_dbm = level;
        if level != dbm {
            tracing::debug!(requested = dbm, applied = level, "radio power rounded down");
        }
        Ok(level)
    }

    pub fn set_bitrate(&mut self, bps: u32) -> Result<(), RadioError> {
        check_bitrate(bps)?;
        let (word, low) = data_rate_word(bps);
        let mode = self.bus.read_register(reg::MOD_MODE_1)?;
        let mode = if low { mode | TX_DR_SCALE } else { mode & !TX_DR_SCALE };
        let word = word.to_be_bytes();
        self.bus.write_register(reg::MOD_MODE_1, mode)?;
        self.bus.write_register(reg::TX_DATA_RATE_1, word[0])?;
        self.bus.write_register(reg::TX_DATA_RATE_0, word[1])?;
        self.applied.bitrate_bps = bps;
        Ok(())
    }

    pub fn set_preamble_length(&mut self, nibbles: u8) -> Result<(), RadioError> {
        self.bus.write_register(reg::PREAMBLE_LEN, nibbles)?;
        self.applied.preamble_nibbles = nibbles;
        Ok(())
    }

    pub fn set_sync_word(&mut self, word: u32) -> Result<(), RadioError> {
        let bytes = word.to_be_bytes();
        for (reg, b) in [
            reg::SYNC_WORD_3,
            reg::SYNC_WORD_2,
            reg::SYNC_WORD_1,
            reg::SYNC_WORD_0,
        ]
        .into_iter()
        .zip(bytes)
        {
            self.bus.write_register(reg, b)?;
        }
        self.applied.sync_word = word;
        Ok(())
    }

    pub fn set_packet_length(&mut self, len: u8) -> Result<(), RadioError> {
        self.bus.write_register(reg::TX_PKT_LEN, len)?;
        self.packet_len = Some(len);
        Ok(())
    }

    pub fn packet_length(&self) -> Option<u8> {
        self.packet_len
    }

    /// Leave TX/RX and park the transceiver in ready mode.
    pub fn standby(&mut self) -> Result<(), RadioError> {
        self.bus.write_register(reg::OPERATING_MODE, MODE_READY)?;
        Ok(())
    }

    /// Switch to FIFO mode and start receiving or transmitting.
    pub fn start(&mut self, mode: RadioMode) -> Result<(), RadioError> {
        self.bus.write_register(reg::MOD_MODE_2, MOD_FIFO_FSK)?;
        let op = match mode {
            RadioMode::Receive => MODE_READY | MODE_RX,
            RadioMode::Transmit => MODE_READY | MODE_TX,
        };
        self.bus.write_register(reg::OPERATING_MODE, op)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingBus {
        writes: Vec<(u8, u8)>,
        regs: HashMap<u8, u8>,
        fail: bool,
    }

    impl RegisterBus for RecordingBus {
        fn write_register(&mut self, reg: u8, value: u8) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Disconnected);
            }
            self.writes.push((reg, value));
            self.regs.insert(reg, value);
            Ok(())
        }

        fn read_register(&mut self, reg: u8) -> Result<u8, TransportError> {
            Ok(self.regs.get(&reg).copied().unwrap_or(0))
        }
    }

    fn radio() -> Radio<RecordingBus> {
        Radio::new(RecordingBus::default())
    }

    // ─── Frequency ──────────────────────────────────────────────────────

    #[test]
    fn frequency_register_sequence() {
        let mut r = radio();
        r.set_frequency(433_050).unwrap();
        // 3050 kHz above 430 MHz × 6.4 = 19520 = 0x4C40
        assert_eq!(
            r.bus().writes,
            vec![(0x75, 0x53), (0x73, 0), (0x74, 0), (0x76, 0x4C), (0x77, 0x40)]
        );
        assert_eq!(r.settings().frequency_khz, 433_050);
    }

    #[test]
    fn frequency_out_of_band_writes_nothing() {
        let mut r = radio();
        assert_eq!(
            r.set_frequency(433_049).unwrap_err(),
            RadioError::FrequencyOutOfRange(433_049)
        );
        assert!(r.set_frequency(434_791).is_err());
        assert!(r.bus().writes.is_empty());
    }

    #[test]
    fn carrier_word_at_band_edges() {
        assert_eq!(carrier_word(MIN_FREQUENCY_KHZ), Some(19_520));
        assert_eq!(carrier_word(MAX_FREQUENCY_KHZ), Some(30_656));
    }

    #[test]
    fn carrier_word_rejects_unrepresentable_frequencies() {
        assert_eq!(carrier_word(429_999), None);
        assert_eq!(carrier_word(0), None);
        assert_eq!(carrier_word(u32::MAX), None);
        assert_eq!(carrier_word(430_000), Some(0));
    }

    // ─── Power ──────────────────────────────────────────────────────────

    #[test]
    fn power_rounds_down_to_legal_level() {
        assert_eq!(quantize_power(-20), (-8, 0));
        assert_eq!(quantize_power(-8), (-8, 0));
        assert_eq!(quantize_power(-6), (-8, 0));
        assert_eq!(quantize_power(-5), (-5, 1));
        assert_eq!(quantize_power(0), (-2, 2));
        assert_eq!(quantize_power(3), (1, 3));
        assert_eq!(quantize_power(9), (7, 5));
        assert_eq!(quantize_power(13), (10, 6), "13 dBm is never selected");
    }

    #[test]
    fn set_power_reports_applied_level() {
        let mut r = radio();
        assert_eq!(r.set_power(6).unwrap(), 4);
        assert_eq!(r.bus().writes, vec![(reg::TX_POWER, 4)]);
        assert_eq!(r.settings().power_dbm, 4);
    }

    // ─── Bitrate ────────────────────────────────────────────────────────

    #[test]
    fn low_bitrate_sets_scale_bit() {
        let mut r = radio();
        r.bus.regs.insert(reg::MOD_MODE_1, 0x0C);
        r.set_bitrate(10_000).unwrap();
        let (word, low) = data_rate_word(10_000);
        assert!(low);
        assert_eq!(word, 20_971);
        assert_eq!(
            r.bus().writes,
            vec![(0x70, 0x2C), (0x6E, (word >> 8) as u8), (0x6F, word as u8)]
        );
    }

    #[test]
    fn high_bitrate_clears_scale_bit() {
        let mut r = radio();
        r.bus.regs.insert(reg::MOD_MODE_1, 0x2C);
        r.set_bitrate(64_000).unwrap();
        assert_eq!(data_rate_word(64_000), (4194, false));
        assert_eq!(r.bus().writes[0], (0x70, 0x0C));
    }

    #[test]
    fn bitrate_out_of_range_writes_nothing() {
        let mut r = radio();
        assert!(r.set_bitrate(999).is_err());
        assert!(r.set_bitrate(256_001).is_err());
        assert!(r.bus().writes.is_empty());
    }

    // ─── Other Registers ────────────────────────────────────────────────

    #[test]
    fn sync_word_written_msb_first() {
        let mut r = radio();
        r.set_sync_word(0x2DD4_1234).unwrap();
        assert_eq!(
            r.bus().writes,
            vec![(0x36, 0x2D), (0x37, 0xD4), (0x38, 0x12), (0x39, 0x34)]
        );
    }

    #[test]
    fn setters_are_idempotent() {
        let mut r = radio();
        r.set_preamble_length(10).unwrap();
        let once = r.bus().regs.clone();
        r.set_preamble_length(10).unwrap();
        assert_eq!(r.bus().regs, once);
        assert_eq!(r.settings().preamble_nibbles, 10);
    }

    #[test]
    fn start_and_standby_modes() {
        let mut r = radio();
        r.start(RadioMode::Transmit).unwrap();
        r.standby().unwrap();
        assert_eq!(
            r.bus().writes,
            vec![(reg::MOD_MODE_2, 0x22), (reg::OPERATING_MODE, 0x09), (reg::OPERATING_MODE, 0x01)]
        );
    }

    #[test]
    fn apply_settings_block() {
        let mut r = radio();
        let settings = RadioSettings {
            frequency_khz: 434_000,
            power_dbm: 7,
            bitrate_bps: 9_600,
            preamble_nibbles: 12,
            sync_word: 0xDEAD_BEEF,
        };
        settings.apply(&mut r).unwrap();
        assert_eq!(r.settings(), &settings);
        r.set_packet_length(146).unwrap();
        assert_eq!(r.packet_length(), Some(146));
    }

    #[test]
    fn bus_failure_surfaces() {
        let mut r = Radio::new(RecordingBus {
            fail: true,
            ..Default::default()
        });
        assert_eq!(
            r.set_preamble_length(8).unwrap_err(),
            RadioError::Bus(TransportError::Disconnected)
        );
    }

    #[test]
    fn write_command_sets_flag() {
        assert_eq!(write_command(reg::TX_POWER, 6), [0xED, 6]);
    }
}
