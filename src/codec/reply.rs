//! Replies to get-version and get-status.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::{LinkError, Result};
use crate::protocol::{DataChannel, Mode};

const STATUS_TX: u8 = 0x01;
const STATUS_CD: u8 = 0x02;
const STATUS_LOCKOUT: u8 = 0x04;
const STATUS_ERROR: u8 = 0x08;

/// Capability bytes from the version reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub cap1: u8,
    pub cap2: u8,
}

impl Capabilities {
    /// Firmware that predates capability reporting supports everything.
    pub const ALL: Capabilities = Capabilities {
        cap1: 0xFF,
        cap2: 0xFF,
    };

    pub fn supports(&self, mode: Mode) -> bool {
        match mode {
            Mode::Idle => true,
            Mode::DStar => self.cap1 & 0x01 != 0,
            Mode::Dmr => self.cap1 & 0x02 != 0,
            Mode::Ysf => self.cap1 & 0x04 != 0,
            Mode::P25 => self.cap1 & 0x08 != 0,
            Mode::Nxdn => self.cap1 & 0x10 != 0,
            Mode::M17 => self.cap1 & 0x20 != 0,
            Mode::Fm => self.cap1 & 0x40 != 0,
            Mode::Ax25 => self.cap2 & 0x02 != 0,
        }
    }

    pub fn supports_paging(&self) -> bool {
        self.cap2 & 0x01 != 0
    }
}

/// Parsed get-version reply.
///
/// Layout: `[protocol, hardware type, cap1, cap2, description...]`. Protocol
/// 1 firmware has no capability bytes and the description starts at byte 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemVersion {
    pub protocol: u8,
    pub hardware: u8,
    pub capabilities: Capabilities,
    pub description: String,
}

impl ModemVersion {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (&protocol, rest) = payload
            .split_first()
            .ok_or_else(|| LinkError::Protocol("empty version reply".into()))?;

        if protocol == 0 {
            return Err(LinkError::Protocol("version reply with protocol 0".into()));
        }

        let hardware = rest.first().copied().unwrap_or(0);

        let (capabilities, description) = if protocol >= 2 {
            if payload.len() < 4 {
                return Err(LinkError::Protocol(format!(
                    "version reply too short: {} bytes",
                    payload.len()
                )));
            }
            (
                Capabilities {
                    cap1: payload[2],
                    cap2: payload[3],
                },
                &payload[4..],
            )
        } else {
            (Capabilities::ALL, payload.get(2..).unwrap_or(&[]))
        };

        Ok(Self {
            protocol,
            hardware,
            capabilities,
            description: String::from_utf8_lossy(description)
                .trim_end_matches('\0')
                .trim()
                .to_string(),
        })
    }

    /// Encode in the protocol-2 layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.description.len());
        buf.put_u8(self.protocol);
        buf.put_u8(self.hardware);
        buf.put_u8(self.capabilities.cap1);
        buf.put_u8(self.capabilities.cap2);
        buf.put_slice(self.description.as_bytes());
        buf.freeze()
    }
}

/// Parsed get-status reply.
///
/// Layout: `[mode, flags, then big-endian u16 free TX bytes per channel]` in
/// [`DataChannel::ALL`] order. Short replies only cover the leading channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModemStatus {
    /// Raw mode byte; see [`ModemStatus::mode`].
    pub mode_byte: u8,
    pub tx: bool,
    pub carrier_detect: bool,
    pub lockout: bool,
    pub error: bool,
    pub free_space: Vec<(DataChannel, u16)>,
}

impl ModemStatus {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(LinkError::Protocol(format!(
                "status reply too short: {} bytes",
                payload.len()
            )));
        }

        let flags = payload[1];
        let free_space = payload[2..]
            .chunks_exact(2)
            .zip(DataChannel::ALL)
            .map(|(pair, channel)| (channel, u16::from_be_bytes([pair[0], pair[1]])))
            .collect();

        Ok(Self {
            mode_byte: payload[0],
            tx: flags & STATUS_TX != 0,
            carrier_detect: flags & STATUS_CD != 0,
            lockout: flags & STATUS_LOCKOUT != 0,
            error: flags & STATUS_ERROR != 0,
            free_space,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut flags = 0;
        if self.tx {
            flags |= STATUS_TX;
        }
        if self.carrier_detect {
            flags |= STATUS_CD;
        }
        if self.lockout {
            flags |= STATUS_LOCKOUT;
        }
        if self.error {
            flags |= STATUS_ERROR;
        }

        let mut buf = BytesMut::with_capacity(2 + 2 * self.free_space.len());
        buf.put_u8(self.mode_byte);
        buf.put_u8(flags);
        for channel in DataChannel::ALL {
            match self.free_space.iter().find(|(ch, _)| *ch == channel) {
                Some((_, free)) => buf.put_u16(*free),
                None => break,
            }
        }
        buf.freeze()
    }

    /// Mode the modem reports, if it is one this host knows.
    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u8(self.mode_byte)
    }

    /// True when the modem refuses to transmit.
    pub fn is_locked_out(&self) -> bool {
        self.lockout || self.error
    }

    pub fn free(&self, channel: DataChannel) -> Option<u16> {
        self.free_space
            .iter()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, free)| *free)
    }
}
