//! Codec module - typed modem command and reply payloads.
//!
//! Frames carry opaque bytes; this module gives the few payloads the host
//! itself interprets a typed form:
//!
//! - [`ModemConfig`] - the set-config payload (frequencies, offsets, enabled modes)
//! - [`ModemLevels`] - the set-modem-config payload (per-mode output levels)
//! - [`ModeParams`] - per-mode parameters (colour code, TX hang, AX.25, FM ID)
//! - [`ModemVersion`] - the get-version reply
//! - [`ModemStatus`] - the get-status reply
//!
//! Protocol traffic (voice frames, paging) is never decoded here.
//!
//! # Example
//!
//! ```
//! use mmdvm_link::codec::ModemStatus;
//!
//! let status = ModemStatus::decode(&[0x03, 0x01, 0x00, 0x10]).unwrap();
//! assert!(status.tx);
//! assert!(!status.lockout);
//! ```

mod config;
mod reply;

pub use config::{
    Ax25Params, FmParams, ModeParams, ModemConfig, ModemLevels, FM_CALLSIGN_MAX, SET_CONFIG_LEN,
    SET_LEVELS_LEN,
};
pub use reply::{Capabilities, ModemStatus, ModemVersion};
