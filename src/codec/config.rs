//! Configuration payloads pushed to the modem during the handshake.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::{CommandType, Mode};

/// Length of the set-config payload.
pub const SET_CONFIG_LEN: usize = 23;

/// Length of the set-modem-config payload.
pub const SET_LEVELS_LEN: usize = 11;

/// Longest FM callsign the modem accepts.
pub const FM_CALLSIGN_MAX: usize = 8;

const FLAG_POCSAG: u8 = 0x40;
const FLAG2_AX25: u8 = 0x01;
const FLAG2_DUPLEX: u8 = 0x80;

/// Scale a 0-100 percentage to a 0-255 wire level.
fn scale_level(percent: f32) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    (percent.clamp(0.0, 100.0) * 255.0 / 100.0).round() as u8
}

/// Radio parameters and enabled modes (set-config).
///
/// Multi-byte fields are big-endian:
///
/// ```text
/// rx freq u32 | tx freq u32 | rx offset i16 | tx offset i16 |
/// tx dc i8 | rx dc i8 | rf level u8 | pocsag freq u32 |
/// mode flags u8 | flags2 u8 | tx delay u8 (10ms) | colour code u8
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ModemConfig {
    pub rx_frequency: u32,
    pub tx_frequency: u32,
    pub rx_offset: i16,
    pub tx_offset: i16,
    pub tx_dc_offset: i8,
    pub rx_dc_offset: i8,
    /// RF output power, percent.
    pub rf_level: f32,
    pub pocsag_frequency: u32,
    pub enabled_modes: Vec<Mode>,
    pub pocsag_enabled: bool,
    pub duplex: bool,
    pub tx_delay_ms: u32,
    pub colour_code: u8,
}

impl ModemConfig {
    /// Enabled-mode flags byte.
    pub fn mode_flags(&self) -> u8 {
        let flags = self
            .enabled_modes
            .iter()
            .fold(0u8, |acc, mode| acc | mode.config_flag());
        if self.pocsag_enabled {
            flags | FLAG_POCSAG
        } else {
            flags
        }
    }

    /// Second flags byte (AX.25 enable, duplex).
    pub fn flags2(&self) -> u8 {
        let mut flags = 0;
        if self.enabled_modes.contains(&Mode::Ax25) {
            flags |= FLAG2_AX25;
        }
        if self.duplex {
            flags |= FLAG2_DUPLEX;
        }
        flags
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SET_CONFIG_LEN);
        buf.put_u32(self.rx_frequency);
        buf.put_u32(self.tx_frequency);
        buf.put_i16(self.rx_offset);
        buf.put_i16(self.tx_offset);
        buf.put_i8(self.tx_dc_offset);
        buf.put_i8(self.rx_dc_offset);
        buf.put_u8(scale_level(self.rf_level));
        buf.put_u32(self.pocsag_frequency);
        buf.put_u8(self.mode_flags());
        buf.put_u8(self.flags2());
        buf.put_u8((self.tx_delay_ms / 10).min(u8::MAX as u32) as u8);
        buf.put_u8(self.colour_code & 0x0F);
        buf.freeze()
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            rx_frequency: 435_000_000,
            tx_frequency: 435_000_000,
            rx_offset: 0,
            tx_offset: 0,
            tx_dc_offset: 0,
            rx_dc_offset: 0,
            rf_level: 100.0,
            pocsag_frequency: 439_987_500,
            enabled_modes: Vec::new(),
            pocsag_enabled: false,
            duplex: false,
            tx_delay_ms: 100,
            colour_code: 1,
        }
    }
}

/// Output levels per mode, in percent (set-modem-config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemLevels {
    pub rx: f32,
    pub cw_id: f32,
    pub dstar: f32,
    pub dmr: f32,
    pub ysf: f32,
    pub p25: f32,
    pub nxdn: f32,
    pub m17: f32,
    pub pocsag: f32,
    pub fm: f32,
    pub ax25: f32,
}

impl ModemLevels {
    pub fn encode(&self) -> Bytes {
        let levels = [
            self.rx,
            self.cw_id,
            self.dstar,
            self.dmr,
            self.ysf,
            self.p25,
            self.nxdn,
            self.m17,
            self.pocsag,
            self.fm,
            self.ax25,
        ];

        let mut buf = BytesMut::with_capacity(SET_LEVELS_LEN);
        for level in levels {
            buf.put_u8(scale_level(level));
        }
        buf.freeze()
    }
}

impl Default for ModemLevels {
    fn default() -> Self {
        Self {
            rx: 50.0,
            cw_id: 50.0,
            dstar: 50.0,
            dmr: 50.0,
            ysf: 50.0,
            p25: 50.0,
            nxdn: 50.0,
            m17: 50.0,
            pocsag: 50.0,
            fm: 50.0,
            ax25: 50.0,
        }
    }
}

/// AX.25 channel access parameters (set-ax25-params).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ax25Params {
    pub rx_twist: i8,
    pub tx_delay_ms: u32,
    pub slot_time_ms: u32,
    pub p_persist: u8,
}

impl Default for Ax25Params {
    fn default() -> Self {
        Self {
            rx_twist: 6,
            tx_delay_ms: 300,
            slot_time_ms: 30,
            p_persist: 128,
        }
    }
}

/// FM callsign announcement (set-fm-params).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FmParams {
    pub callsign: String,
    /// Words per minute.
    pub speed: u8,
    /// Tone in units of 10Hz.
    pub frequency: u8,
    /// Minutes between announcements.
    pub time: u8,
    pub holdoff: u8,
    /// Percent.
    pub high_level: f32,
    /// Percent.
    pub low_level: f32,
    pub at_start: bool,
    pub at_end: bool,
    pub at_latch: bool,
}

impl Default for FmParams {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            speed: 20,
            frequency: 100,
            time: 10,
            holdoff: 0,
            high_level: 50.0,
            low_level: 20.0,
            at_start: true,
            at_end: false,
            at_latch: false,
        }
    }
}

/// Per-mode parameters pushed after set-config.
///
/// Delays are sent in 10ms units, levels scaled like [`ModemLevels`].
#[derive(Debug, Clone, PartialEq)]
pub enum ModeParams {
    Dmr { colour_code: u8 },
    Ysf { low_deviation: bool, tx_hang: u8 },
    P25 { tx_hang: u8 },
    Nxdn { tx_hang: u8 },
    M17 { tx_hang: u8 },
    Ax25(Ax25Params),
    Fm(FmParams),
}

impl ModeParams {
    pub fn mode(&self) -> Mode {
        match self {
            ModeParams::Dmr { .. } => Mode::Dmr,
            ModeParams::Ysf { .. } => Mode::Ysf,
            ModeParams::P25 { .. } => Mode::P25,
            ModeParams::Nxdn { .. } => Mode::Nxdn,
            ModeParams::M17 { .. } => Mode::M17,
            ModeParams::Ax25(_) => Mode::Ax25,
            ModeParams::Fm(_) => Mode::Fm,
        }
    }

    pub fn command(&self) -> CommandType {
        match self {
            ModeParams::Dmr { .. } => CommandType::SetDmrParams,
            ModeParams::Ysf { .. } => CommandType::SetYsfParams,
            ModeParams::P25 { .. } => CommandType::SetP25Params,
            ModeParams::Nxdn { .. } => CommandType::SetNxdnParams,
            ModeParams::M17 { .. } => CommandType::SetM17Params,
            ModeParams::Ax25(_) => CommandType::SetAx25Params,
            ModeParams::Fm(_) => CommandType::SetFmParams,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FM_CALLSIGN_MAX + 7);
        match self {
            ModeParams::Dmr { colour_code } => buf.put_u8(colour_code & 0x0F),
            ModeParams::Ysf {
                low_deviation,
                tx_hang,
            } => {
                buf.put_u8(u8::from(*low_deviation));
                buf.put_u8(*tx_hang);
            }
            ModeParams::P25 { tx_hang }
            | ModeParams::Nxdn { tx_hang }
            | ModeParams::M17 { tx_hang } => buf.put_u8(*tx_hang),
            ModeParams::Ax25(ax25) => {
                buf.put_i8(ax25.rx_twist);
                buf.put_u8(tens_of_ms(ax25.tx_delay_ms));
                buf.put_u8(tens_of_ms(ax25.slot_time_ms));
                buf.put_u8(ax25.p_persist);
            }
            ModeParams::Fm(fm) => {
                let callsign = fm.callsign.as_bytes();
                buf.put_slice(&callsign[..callsign.len().min(FM_CALLSIGN_MAX)]);
                buf.put_u8(fm.speed);
                buf.put_u8(fm.frequency);
                buf.put_u8(fm.time);
                buf.put_u8(fm.holdoff);
                buf.put_u8(scale_level(fm.high_level));
                buf.put_u8(scale_level(fm.low_level));
                let mut flags = 0;
                if fm.at_start {
                    flags |= 0x01;
                }
                if fm.at_end {
                    flags |= 0x02;
                }
                if fm.at_latch {
                    flags |= 0x04;
                }
                buf.put_u8(flags);
            }
        }
        buf.freeze()
    }
}

fn tens_of_ms(ms: u32) -> u8 {
    (ms / 10).min(u8::MAX as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_level() {
        assert_eq!(scale_level(0.0), 0);
        assert_eq!(scale_level(50.0), 128);
        assert_eq!(scale_level(100.0), 255);
        assert_eq!(scale_level(150.0), 255);
        assert_eq!(scale_level(-3.0), 0);
        assert_eq!(scale_level(f32::NAN), 0);
    }

    #[test]
    fn test_config_length_and_layout() {
        let config = ModemConfig {
            rx_frequency: 0x1A2B_3C4D,
            tx_frequency: 0x0102_0304,
            rx_offset: -2,
            tx_offset: 300,
            tx_dc_offset: -1,
            rx_dc_offset: 5,
            rf_level: 100.0,
            pocsag_frequency: 0xAABB_CCDD,
            enabled_modes: vec![Mode::Dmr, Mode::Ysf],
            pocsag_enabled: false,
            duplex: true,
            tx_delay_ms: 250,
            colour_code: 0x13,
        };

        let bytes = config.encode();
        assert_eq!(bytes.len(), SET_CONFIG_LEN);
        assert_eq!(&bytes[0..4], &[0x1A, 0x2B, 0x3C, 0x4D]);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..10], &[0xFF, 0xFE]);
        assert_eq!(&bytes[10..12], &[0x01, 0x2C]);
        assert_eq!(bytes[12], 0xFF);
        assert_eq!(bytes[13], 0x05);
        assert_eq!(bytes[14], 255);
        assert_eq!(&bytes[15..19], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(bytes[19], 0x06);
        assert_eq!(bytes[20], 0x80);
        assert_eq!(bytes[21], 25);
        assert_eq!(bytes[22], 0x03);
    }

    #[test]
    fn test_mode_flags() {
        let config = ModemConfig {
            enabled_modes: vec![Mode::DStar, Mode::Fm, Mode::Ax25],
            pocsag_enabled: true,
            ..ModemConfig::default()
        };
        assert_eq!(config.mode_flags(), 0x01 | 0x80 | 0x40);
        assert_eq!(config.flags2(), 0x01);
    }

    #[test]
    fn test_tx_delay_saturates() {
        let config = ModemConfig {
            tx_delay_ms: 10_000,
            ..ModemConfig::default()
        };
        assert_eq!(config.encode()[21], 255);
    }

    #[test]
    fn test_levels_layout() {
        let levels = ModemLevels {
            rx: 0.0,
            cw_id: 100.0,
            ax25: 20.0,
            ..ModemLevels::default()
        };
        let bytes = levels.encode();
        assert_eq!(bytes.len(), SET_LEVELS_LEN);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 255);
        assert_eq!(bytes[2], 128);
        assert_eq!(bytes[10], 51);
    }

    #[test]
    fn test_mode_params_payloads() {
        let dmr = ModeParams::Dmr { colour_code: 0x1C };
        assert_eq!(dmr.command().as_u8(), 0x05);
        assert_eq!(&dmr.encode()[..], &[0x0C]);

        let ysf = ModeParams::Ysf {
            low_deviation: true,
            tx_hang: 4,
        };
        assert_eq!(ysf.command().as_u8(), 0x06);
        assert_eq!(&ysf.encode()[..], &[0x01, 0x04]);

        assert_eq!(ModeParams::M17 { tx_hang: 5 }.command().as_u8(), 0x0A);
        assert_eq!(ModeParams::Nxdn { tx_hang: 5 }.mode(), Mode::Nxdn);

        let ax25 = ModeParams::Ax25(Ax25Params {
            rx_twist: -3,
            ..Ax25Params::default()
        });
        assert_eq!(ax25.command().as_u8(), 0x0B);
        assert_eq!(&ax25.encode()[..], &[0xFD, 30, 3, 128]);
    }

    #[test]
    fn test_fm_params_layout() {
        let fm = ModeParams::Fm(FmParams {
            callsign: "N0CALL/REPEATER".into(),
            high_level: 100.0,
            low_level: 0.0,
            at_end: true,
            ..FmParams::default()
        });
        let bytes = fm.encode();
        assert_eq!(fm.command().as_u8(), 0x0C);
        assert_eq!(bytes.len(), FM_CALLSIGN_MAX + 7);
        assert_eq!(&bytes[..8], b"N0CALL/R");
        assert_eq!(&bytes[8..], &[20, 100, 10, 0, 255, 0, 0x03]);
    }

    #[test]
    fn test_levels_from_partial_toml() {
        let levels: ModemLevels = toml::from_str("rx = 30.0\nfm = 75.0").unwrap();
        assert_eq!(levels.rx, 30.0);
        assert_eq!(levels.fm, 75.0);
        assert_eq!(levels.dmr, 50.0);
    }
}
