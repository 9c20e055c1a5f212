//! TOML host configuration.
//!
//! ```toml
//! fixed_mode = false
//!
//! [modem]
//! port = "/dev/ttyACM0"
//! rx_frequency = 435000000
//! tx_frequency = 435000000
//!
//! [modes.dmr]
//! enable = true
//! rf_hang = 10
//! net_hang = 3
//!
//! [modes.ysf]
//! tx_hang = 4
//! low_deviation = false
//!
//! [modes.fm.id]
//! callsign = "N0CALL"
//!
//! [cw_id]
//! callsign = "N0CALL"
//! interval = 10
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::Deserialize;

use crate::arbiter::{ArbiterConfig, CwIdConfig, HangConfig};
use crate::bridge::DEFAULT_NETWORK_QUEUE;
use crate::codec::{Ax25Params, FmParams, ModeParams, ModemConfig, ModemLevels};
use crate::error::{LinkError, Result};
use crate::protocol::Mode;
use crate::session::{Handshake, SessionConfig};
use crate::transport::DEFAULT_BAUD_RATE;
use crate::writer::WriterConfig;

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    /// Stay in the single enabled protocol.
    #[serde(default)]
    pub fixed_mode: bool,
    #[serde(default)]
    pub modem: ModemSection,
    #[serde(default)]
    pub timing: TimingSection,
    /// Keyed by lowercase mode name (`dstar`, `dmr`, `ysf`, ...).
    #[serde(default)]
    pub modes: BTreeMap<String, ModeSection>,
    pub cw_id: Option<CwIdSection>,
}

impl HostConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| LinkError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let enabled = self.enabled_modes()?;

        if self.modem.colour_code > 15 {
            return Err(LinkError::Config(format!(
                "colour_code {} out of range 0-15",
                self.modem.colour_code
            )));
        }
        if self.fixed_mode && enabled.len() != 1 {
            return Err(LinkError::Config(format!(
                "fixed_mode needs exactly one enabled mode, found {}",
                enabled.len()
            )));
        }
        if let Some(cw_id) = &self.cw_id {
            if cw_id.enable && cw_id.callsign.trim().is_empty() {
                return Err(LinkError::Config("cw_id.callsign is empty".into()));
            }
        }
        for (name, section) in &self.modes {
            section.validate(name, parse_mode(name)?)?;
        }
        Ok(())
    }

    /// Every `[modes.<name>]` section with its parsed mode.
    pub fn mode_sections(&self) -> Result<Vec<(Mode, &ModeSection)>> {
        self.modes
            .iter()
            .map(|(name, section)| Ok((parse_mode(name)?, section)))
            .collect()
    }

    /// Protocols with `enable = true`, in set-mode order.
    pub fn enabled_modes(&self) -> Result<Vec<Mode>> {
        let mut modes: Vec<Mode> = self
            .mode_sections()?
            .into_iter()
            .filter(|(_, section)| section.enable)
            .map(|(mode, _)| mode)
            .collect();
        modes.sort();
        Ok(modes)
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        let timing = &self.timing;
        let mut tx_capacities = HashMap::new();
        for (mode, section) in self.mode_sections()? {
            if let Some(capacity) = section.tx_capacity {
                for &channel in mode.channels() {
                    tx_capacities.insert(channel, capacity);
                }
            }
        }

        Ok(SessionConfig {
            command_timeout: millis(timing.command_timeout),
            data_timeout: millis(timing.data_timeout),
            keepalive_interval: millis(timing.keepalive),
            retry_base: millis(timing.backoff_base),
            retry_cap: millis(timing.backoff_cap),
            version_attempts: timing.version_attempts,
            tx_capacities,
        })
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            inter_frame_gap: millis(self.timing.inter_frame_gap),
            ..WriterConfig::default()
        }
    }

    pub fn arbiter_config(&self) -> Result<ArbiterConfig> {
        let hang = self
            .mode_sections()?
            .into_iter()
            .filter(|(_, section)| section.enable)
            .map(|(mode, section)| (mode, section.hang()))
            .collect();

        let cw_id = self
            .cw_id
            .as_ref()
            .filter(|cw_id| cw_id.enable)
            .map(|cw_id| CwIdConfig {
                callsign: cw_id.callsign.trim().to_uppercase(),
                interval: Duration::from_secs(cw_id.interval * 60),
            });

        Ok(ArbiterConfig {
            settle: millis(self.timing.settle),
            drain_bound: millis(self.timing.drain),
            fixed_mode: self.fixed_mode,
            hang,
            cw_id,
        })
    }

    /// Payloads for the modem handshake.
    pub fn handshake(&self) -> Result<Handshake> {
        let modem = &self.modem;
        Ok(Handshake {
            config: ModemConfig {
                rx_frequency: modem.rx_frequency,
                tx_frequency: modem.tx_frequency,
                rx_offset: modem.rx_offset,
                tx_offset: modem.tx_offset,
                tx_dc_offset: modem.tx_dc_offset,
                rx_dc_offset: modem.rx_dc_offset,
                rf_level: modem.rf_level,
                pocsag_frequency: modem.pocsag_frequency,
                enabled_modes: self.enabled_modes()?,
                pocsag_enabled: modem.pocsag,
                duplex: modem.duplex,
                tx_delay_ms: modem.tx_delay,
                colour_code: modem.colour_code,
            },
            levels: modem.levels.clone(),
            mode_params: self.mode_params()?,
        })
    }

    /// Per-mode parameters for every enabled mode that has them.
    pub fn mode_params(&self) -> Result<Vec<ModeParams>> {
        let mut params = Vec::new();
        for (mode, section) in self.mode_sections()? {
            if !section.enable {
                continue;
            }
            let tx_hang = section.tx_hang.unwrap_or(DEFAULT_TX_HANG);
            let entry = match mode {
                Mode::Dmr => Some(ModeParams::Dmr {
                    colour_code: self.modem.colour_code,
                }),
                Mode::Ysf => Some(ModeParams::Ysf {
                    low_deviation: section.low_deviation.unwrap_or(false),
                    tx_hang: section.tx_hang.unwrap_or(DEFAULT_YSF_TX_HANG),
                }),
                Mode::P25 => Some(ModeParams::P25 { tx_hang }),
                Mode::Nxdn => Some(ModeParams::Nxdn { tx_hang }),
                Mode::M17 => Some(ModeParams::M17 { tx_hang }),
                Mode::Ax25 => Some(ModeParams::Ax25(section.access.unwrap_or_default())),
                Mode::Fm => section.id.clone().map(ModeParams::Fm),
                Mode::DStar | Mode::Idle => None,
            };
            params.extend(entry);
        }
        Ok(params)
    }
}

/// Seconds the modem keeps transmitting after P25, NXDN or M17 traffic.
const DEFAULT_TX_HANG: u8 = 5;

const DEFAULT_YSF_TX_HANG: u8 = 4;

fn parse_mode(name: &str) -> Result<Mode> {
    let de: StrDeserializer<'_, ValueError> = name.into_deserializer();
    match Mode::deserialize(de) {
        Ok(Mode::Idle) | Err(_) => Err(LinkError::Config(format!("unknown mode '{name}'"))),
        Ok(mode) => Ok(mode),
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// The `[modem]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModemSection {
    pub port: String,
    pub baud: u32,
    pub rx_frequency: u32,
    pub tx_frequency: u32,
    pub rx_offset: i16,
    pub tx_offset: i16,
    pub rx_dc_offset: i8,
    pub tx_dc_offset: i8,
    /// Percent.
    pub rf_level: f32,
    pub pocsag: bool,
    pub pocsag_frequency: u32,
    pub duplex: bool,
    /// Milliseconds.
    pub tx_delay: u32,
    pub colour_code: u8,
    /// Pushed with set-modem-config when present.
    pub levels: Option<ModemLevels>,
}

impl Default for ModemSection {
    fn default() -> Self {
        let modem = ModemConfig::default();
        Self {
            port: "/dev/ttyACM0".into(),
            baud: DEFAULT_BAUD_RATE,
            rx_frequency: modem.rx_frequency,
            tx_frequency: modem.tx_frequency,
            rx_offset: modem.rx_offset,
            tx_offset: modem.tx_offset,
            rx_dc_offset: modem.rx_dc_offset,
            tx_dc_offset: modem.tx_dc_offset,
            rf_level: modem.rf_level,
            pocsag: modem.pocsag_enabled,
            pocsag_frequency: modem.pocsag_frequency,
            duplex: modem.duplex,
            tx_delay: modem.tx_delay_ms,
            colour_code: modem.colour_code,
            levels: None,
        }
    }
}

/// The `[timing]` section. All values in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub command_timeout: u64,
    pub data_timeout: u64,
    pub keepalive: u64,
    pub inter_frame_gap: u64,
    pub settle: u64,
    pub drain: u64,
    pub backoff_base: u64,
    pub backoff_cap: u64,
    pub version_attempts: u32,
}

impl Default for TimingSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        let arbiter = ArbiterConfig::default();
        Self {
            command_timeout: as_millis(session.command_timeout),
            data_timeout: as_millis(session.data_timeout),
            keepalive: as_millis(session.keepalive_interval),
            inter_frame_gap: as_millis(WriterConfig::default().inter_frame_gap),
            settle: as_millis(arbiter.settle),
            drain: as_millis(arbiter.drain_bound),
            backoff_base: as_millis(session.retry_base),
            backoff_cap: as_millis(session.retry_cap),
            version_attempts: session.version_attempts,
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A `[modes.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModeSection {
    pub enable: bool,
    /// Seconds.
    pub rf_hang: u64,
    /// Seconds.
    pub net_hang: u64,
    /// Modem TX buffer size in bytes for each channel of the mode.
    pub tx_capacity: Option<usize>,
    /// Frames queued between the bridge and its network task.
    pub network_queue: usize,
    /// Modem TX hang in seconds (YSF, P25, NXDN, M17).
    pub tx_hang: Option<u8>,
    /// YSF only.
    pub low_deviation: Option<bool>,
    /// `[modes.ax25.access]`
    pub access: Option<Ax25Params>,
    /// `[modes.fm.id]`
    pub id: Option<FmParams>,
}

impl ModeSection {
    /// Reject keys that do not apply to `mode`.
    fn validate(&self, name: &str, mode: Mode) -> Result<()> {
        let misplaced = |key: &str| {
            Err(LinkError::Config(format!(
                "modes.{name}: '{key}' does not apply to {mode}"
            )))
        };

        if self.tx_hang.is_some()
            && !matches!(mode, Mode::Ysf | Mode::P25 | Mode::Nxdn | Mode::M17)
        {
            return misplaced("tx_hang");
        }
        if self.low_deviation.is_some() && mode != Mode::Ysf {
            return misplaced("low_deviation");
        }
        if self.access.is_some() && mode != Mode::Ax25 {
            return misplaced("access");
        }
        match &self.id {
            Some(_) if mode != Mode::Fm => misplaced("id"),
            Some(id) if id.callsign.trim().is_empty() => Err(LinkError::Config(
                "modes.fm.id.callsign is empty".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn hang(&self) -> HangConfig {
        HangConfig {
            rf: Duration::from_secs(self.rf_hang),
            net: Duration::from_secs(self.net_hang),
        }
    }
}

impl Default for ModeSection {
    fn default() -> Self {
        let hang = HangConfig::default();
        Self {
            enable: true,
            rf_hang: hang.rf.as_secs(),
            net_hang: hang.net.as_secs(),
            tx_capacity: None,
            network_queue: DEFAULT_NETWORK_QUEUE,
            tx_hang: None,
            low_deviation: None,
            access: None,
            id: None,
        }
    }
}

/// The `[cw_id]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CwIdSection {
    #[serde(default = "default_true")]
    pub enable: bool,
    pub callsign: String,
    /// Minutes.
    #[serde(default = "default_cw_interval")]
    pub interval: u64,
}

fn default_true() -> bool {
    true
}

fn default_cw_interval() -> u64 {
    10
}
