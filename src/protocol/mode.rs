//! Protocol personalities and the data channels that carry them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::wire_format::frame_type;

/// The single active protocol personality of the modem, or `Idle`.
///
/// Discriminants are the set-mode payload values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    Idle = 0x00,
    DStar = 0x01,
    Dmr = 0x02,
    Ysf = 0x03,
    P25 = 0x04,
    Nxdn = 0x05,
    M17 = 0x06,
    Fm = 0x07,
    Ax25 = 0x08,
}

impl Mode {
    /// Every mode that can own the link, in set-mode order.
    pub const PROTOCOLS: [Mode; 8] = [
        Mode::DStar,
        Mode::Dmr,
        Mode::Ysf,
        Mode::P25,
        Mode::Nxdn,
        Mode::M17,
        Mode::Fm,
        Mode::Ax25,
    ];

    /// Set-mode payload byte.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Mode::Idle),
            0x01 => Some(Mode::DStar),
            0x02 => Some(Mode::Dmr),
            0x03 => Some(Mode::Ysf),
            0x04 => Some(Mode::P25),
            0x05 => Some(Mode::Nxdn),
            0x06 => Some(Mode::M17),
            0x07 => Some(Mode::Fm),
            0x08 => Some(Mode::Ax25),
            _ => None,
        }
    }

    #[inline]
    pub fn is_idle(self) -> bool {
        self == Mode::Idle
    }

    /// Data channels owned by this mode. Empty for `Idle`.
    pub fn channels(self) -> &'static [DataChannel] {
        match self {
            Mode::Idle => &[],
            Mode::DStar => &[DataChannel::DStar],
            Mode::Dmr => &[DataChannel::Dmr1, DataChannel::Dmr2],
            Mode::Ysf => &[DataChannel::Ysf],
            Mode::P25 => &[DataChannel::P25],
            Mode::Nxdn => &[DataChannel::Nxdn],
            Mode::M17 => &[DataChannel::M17],
            Mode::Fm => &[DataChannel::Fm],
            Mode::Ax25 => &[DataChannel::Ax25],
        }
    }

    /// Bit for this mode in the set-config enabled-modes byte.
    ///
    /// AX.25 is carried in the second flags byte and returns 0 here.
    pub fn config_flag(self) -> u8 {
        match self {
            Mode::Idle | Mode::Ax25 => 0x00,
            Mode::DStar => 0x01,
            Mode::Dmr => 0x02,
            Mode::Ysf => 0x04,
            Mode::P25 => 0x08,
            Mode::Nxdn => 0x10,
            Mode::M17 => 0x20,
            Mode::Fm => 0x80,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "IDLE",
            Mode::DStar => "D-STAR",
            Mode::Dmr => "DMR",
            Mode::Ysf => "YSF",
            Mode::P25 => "P25",
            Mode::Nxdn => "NXDN",
            Mode::M17 => "M17",
            Mode::Fm => "FM",
            Mode::Ax25 => "AX.25",
        };
        f.write_str(name)
    }
}

/// One wire data type. DMR has a channel per time slot; POCSAG belongs to no
/// mode because paging runs alongside whatever mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataChannel {
    DStar,
    Dmr1,
    Dmr2,
    Ysf,
    P25,
    Nxdn,
    M17,
    Fm,
    Ax25,
    Pocsag,
}

impl DataChannel {
    /// All channels, in the order their free space appears in a status reply.
    pub const ALL: [DataChannel; 10] = [
        DataChannel::DStar,
        DataChannel::Dmr1,
        DataChannel::Dmr2,
        DataChannel::Ysf,
        DataChannel::P25,
        DataChannel::Nxdn,
        DataChannel::M17,
        DataChannel::Fm,
        DataChannel::Ax25,
        DataChannel::Pocsag,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            DataChannel::DStar => frame_type::DSTAR_DATA,
            DataChannel::Dmr1 => frame_type::DMR_DATA1,
            DataChannel::Dmr2 => frame_type::DMR_DATA2,
            DataChannel::Ysf => frame_type::YSF_DATA,
            DataChannel::P25 => frame_type::P25_DATA,
            DataChannel::Nxdn => frame_type::NXDN_DATA,
            DataChannel::M17 => frame_type::M17_DATA,
            DataChannel::Fm => frame_type::FM_DATA,
            DataChannel::Ax25 => frame_type::AX25_DATA,
            DataChannel::Pocsag => frame_type::POCSAG_DATA,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            frame_type::DSTAR_DATA => Some(DataChannel::DStar),
            frame_type::DMR_DATA1 => Some(DataChannel::Dmr1),
            frame_type::DMR_DATA2 => Some(DataChannel::Dmr2),
            frame_type::YSF_DATA => Some(DataChannel::Ysf),
            frame_type::P25_DATA => Some(DataChannel::P25),
            frame_type::NXDN_DATA => Some(DataChannel::Nxdn),
            frame_type::M17_DATA => Some(DataChannel::M17),
            frame_type::FM_DATA => Some(DataChannel::Fm),
            frame_type::AX25_DATA => Some(DataChannel::Ax25),
            frame_type::POCSAG_DATA => Some(DataChannel::Pocsag),
            _ => None,
        }
    }

    /// The mode this channel belongs to, or `None` for paging.
    pub fn mode(self) -> Option<Mode> {
        match self {
            DataChannel::DStar => Some(Mode::DStar),
            DataChannel::Dmr1 | DataChannel::Dmr2 => Some(Mode::Dmr),
            DataChannel::Ysf => Some(Mode::Ysf),
            DataChannel::P25 => Some(Mode::P25),
            DataChannel::Nxdn => Some(Mode::Nxdn),
            DataChannel::M17 => Some(Mode::M17),
            DataChannel::Fm => Some(Mode::Fm),
            DataChannel::Ax25 => Some(Mode::Ax25),
            DataChannel::Pocsag => None,
        }
    }

    /// Default modem-side TX buffer size in bytes.
    pub fn default_capacity(self) -> usize {
        match self {
            DataChannel::Dmr1 | DataChannel::Dmr2 | DataChannel::Nxdn | DataChannel::Pocsag => {
                2400
            }
            _ => 4800,
        }
    }
}

impl fmt::Display for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataChannel::DStar => "D-STAR",
            DataChannel::Dmr1 => "DMR slot 1",
            DataChannel::Dmr2 => "DMR slot 2",
            DataChannel::Ysf => "YSF",
            DataChannel::P25 => "P25",
            DataChannel::Nxdn => "NXDN",
            DataChannel::M17 => "M17",
            DataChannel::Fm => "FM",
            DataChannel::Ax25 => "AX.25",
            DataChannel::Pocsag => "POCSAG",
        };
        f.write_str(name)
    }
}

/// Traffic direction relative to the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Modem to host (received off the air).
    Rx,
    /// Host to modem (to be transmitted).
    Tx,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_set_mode_values() {
        assert_eq!(Mode::Idle.as_u8(), 0x00);
        assert_eq!(Mode::Ysf.as_u8(), 0x03);
        assert_eq!(Mode::Ax25.as_u8(), 0x08);
        for value in 0x00..=0x08 {
            assert_eq!(Mode::from_u8(value).map(Mode::as_u8), Some(value));
        }
        assert_eq!(Mode::from_u8(0x09), None);
    }

    #[test]
    fn test_channel_wire_values() {
        assert_eq!(DataChannel::DStar.as_u8(), 0x20);
        assert_eq!(DataChannel::Dmr1.as_u8(), 0x22);
        assert_eq!(DataChannel::Dmr2.as_u8(), 0x23);
        assert_eq!(DataChannel::Ax25.as_u8(), 0x29);
        assert_eq!(DataChannel::from_u8(0x21), None);
        for ch in DataChannel::ALL {
            assert_eq!(DataChannel::from_u8(ch.as_u8()), Some(ch));
        }
    }

    #[test]
    fn test_channel_modes() {
        assert_eq!(DataChannel::Dmr2.mode(), Some(Mode::Dmr));
        assert_eq!(DataChannel::Pocsag.mode(), None);
        for mode in Mode::PROTOCOLS {
            for ch in mode.channels() {
                assert_eq!(ch.mode(), Some(mode));
            }
        }
        assert!(Mode::Idle.channels().is_empty());
    }

    #[test]
    fn test_config_flags_are_distinct() {
        let combined = Mode::PROTOCOLS
            .iter()
            .fold(0u8, |acc, m| {
                assert_eq!(acc & m.config_flag(), 0);
                acc | m.config_flag()
            });
        assert_eq!(combined, 0xBF);
    }

    #[test]
    fn test_mode_deserialize_lowercase() {
        let mode: Mode = serde_json::from_str("\"nxdn\"").unwrap();
        assert_eq!(mode, Mode::Nxdn);
        assert_eq!(Mode::DStar.to_string(), "D-STAR");
    }
}
