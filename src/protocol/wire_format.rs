//! Wire format constants and frame type codes.
//!
//! Every frame on the host-modem link has the same layout:
//! ```text
//! ┌────────┬──────────────┬──────┬─────────────────┐
//! │ Marker │ Length L     │ Type │ Payload         │
//! │ 0xE0   │ uint16 BE    │ 1 B  │ L - 1 bytes     │
//! └────────┴──────────────┴──────┴─────────────────┘
//! ```
//!
//! `L` counts the type byte plus the payload, so it is never zero.

use std::fmt;

/// Start-of-frame marker.
pub const START_MARKER: u8 = 0xE0;

/// Bytes preceding the type byte (marker + 16-bit length).
pub const PREFIX_SIZE: usize = 3;

/// Bytes of framing around a payload (marker + length + type).
pub const HEADER_SIZE: usize = 4;

/// Default upper bound for the length field. Anything larger is treated as
/// corruption rather than waited for.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 512;

/// Largest payload the 16-bit length field can describe.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - 1;

/// Raw type byte values.
pub mod frame_type {
    pub const GET_VERSION: u8 = 0x00;
    pub const GET_STATUS: u8 = 0x01;
    pub const SET_CONFIG: u8 = 0x02;
    pub const SET_MODE: u8 = 0x03;
    pub const SET_MODEM_CONFIG: u8 = 0x04;
    pub const SET_DMR_PARAMS: u8 = 0x05;
    pub const SET_YSF_PARAMS: u8 = 0x06;
    pub const SET_P25_PARAMS: u8 = 0x07;
    pub const SET_NXDN_PARAMS: u8 = 0x08;
    pub const SET_M17_PARAMS: u8 = 0x0A;
    pub const SET_AX25_PARAMS: u8 = 0x0B;
    pub const SET_FM_PARAMS: u8 = 0x0C;
    pub const SEND_CW_ID: u8 = 0x0E;

    pub const DSTAR_DATA: u8 = 0x20;
    pub const DMR_DATA1: u8 = 0x22;
    pub const DMR_DATA2: u8 = 0x23;
    pub const YSF_DATA: u8 = 0x24;
    pub const P25_DATA: u8 = 0x25;
    pub const NXDN_DATA: u8 = 0x26;
    pub const M17_DATA: u8 = 0x27;
    pub const FM_DATA: u8 = 0x28;
    pub const AX25_DATA: u8 = 0x29;
    pub const POCSAG_DATA: u8 = 0x50;

    pub const ACK: u8 = 0x70;
    pub const NAK: u8 = 0xFF;

    /// Check whether a type byte belongs to the data range.
    #[inline]
    pub fn is_data(kind: u8) -> bool {
        (DSTAR_DATA..=AX25_DATA).contains(&kind) || kind == POCSAG_DATA
    }
}

/// Commands the host issues on the half-duplex command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandType {
    GetVersion,
    GetStatus,
    SetConfig,
    SetMode,
    SetModemConfig,
    SetDmrParams,
    SetYsfParams,
    SetP25Params,
    SetNxdnParams,
    SetM17Params,
    SetAx25Params,
    SetFmParams,
    SendCwId,
}

impl CommandType {
    /// Wire value of this command.
    pub fn as_u8(self) -> u8 {
        match self {
            CommandType::GetVersion => frame_type::GET_VERSION,
            CommandType::GetStatus => frame_type::GET_STATUS,
            CommandType::SetConfig => frame_type::SET_CONFIG,
            CommandType::SetMode => frame_type::SET_MODE,
            CommandType::SetModemConfig => frame_type::SET_MODEM_CONFIG,
            CommandType::SetDmrParams => frame_type::SET_DMR_PARAMS,
            CommandType::SetYsfParams => frame_type::SET_YSF_PARAMS,
            CommandType::SetP25Params => frame_type::SET_P25_PARAMS,
            CommandType::SetNxdnParams => frame_type::SET_NXDN_PARAMS,
            CommandType::SetM17Params => frame_type::SET_M17_PARAMS,
            CommandType::SetAx25Params => frame_type::SET_AX25_PARAMS,
            CommandType::SetFmParams => frame_type::SET_FM_PARAMS,
            CommandType::SendCwId => frame_type::SEND_CW_ID,
        }
    }

    /// Parse a command type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            frame_type::GET_VERSION => Some(CommandType::GetVersion),
            frame_type::GET_STATUS => Some(CommandType::GetStatus),
            frame_type::SET_CONFIG => Some(CommandType::SetConfig),
            frame_type::SET_MODE => Some(CommandType::SetMode),
            frame_type::SET_MODEM_CONFIG => Some(CommandType::SetModemConfig),
            frame_type::SET_DMR_PARAMS => Some(CommandType::SetDmrParams),
            frame_type::SET_YSF_PARAMS => Some(CommandType::SetYsfParams),
            frame_type::SET_P25_PARAMS => Some(CommandType::SetP25Params),
            frame_type::SET_NXDN_PARAMS => Some(CommandType::SetNxdnParams),
            frame_type::SET_M17_PARAMS => Some(CommandType::SetM17Params),
            frame_type::SET_AX25_PARAMS => Some(CommandType::SetAx25Params),
            frame_type::SET_FM_PARAMS => Some(CommandType::SetFmParams),
            frame_type::SEND_CW_ID => Some(CommandType::SendCwId),
            _ => None,
        }
    }

    /// Whether the modem answers this command with a reply of the same type
    /// (carrying data) rather than a bare Ack.
    pub fn has_data_reply(self) -> bool {
        matches!(self, CommandType::GetVersion | CommandType::GetStatus)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::GetVersion => "get-version",
            CommandType::GetStatus => "get-status",
            CommandType::SetConfig => "set-config",
            CommandType::SetMode => "set-mode",
            CommandType::SetModemConfig => "set-modem-config",
            CommandType::SetDmrParams => "set-dmr-params",
            CommandType::SetYsfParams => "set-ysf-params",
            CommandType::SetP25Params => "set-p25-params",
            CommandType::SetNxdnParams => "set-nxdn-params",
            CommandType::SetM17Params => "set-m17-params",
            CommandType::SetAx25Params => "set-ax25-params",
            CommandType::SetFmParams => "set-fm-params",
            CommandType::SendCwId => "send-cw-id",
        };
        f.write_str(name)
    }
}

/// Reason codes carried in the first byte of a NAK payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NakCode {
    InvalidCommand,
    WrongMode,
    InvalidData,
    Busy,
    Failed,
    NotSupported,
    Unknown(u8),
}

impl NakCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => NakCode::InvalidCommand,
            0x02 => NakCode::WrongMode,
            0x03 => NakCode::InvalidData,
            0x04 => NakCode::Busy,
            0x05 => NakCode::Failed,
            0x06 => NakCode::NotSupported,
            other => NakCode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            NakCode::InvalidCommand => 0x01,
            NakCode::WrongMode => 0x02,
            NakCode::InvalidData => 0x03,
            NakCode::Busy => 0x04,
            NakCode::Failed => 0x05,
            NakCode::NotSupported => 0x06,
            NakCode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for NakCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NakCode::InvalidCommand => f.write_str("invalid command"),
            NakCode::WrongMode => f.write_str("wrong mode"),
            NakCode::InvalidData => f.write_str("invalid data"),
            NakCode::Busy => f.write_str("busy"),
            NakCode::Failed => f.write_str("failed"),
            NakCode::NotSupported => f.write_str("not supported"),
            NakCode::Unknown(code) => write!(f, "unknown error 0x{code:02X}"),
        }
    }
}
