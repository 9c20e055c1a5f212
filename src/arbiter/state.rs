//! Arbiter state, switch triggers and counters.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

use crate::protocol::{DataChannel, Mode};

/// Where the arbiter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArbiterState {
    Idle,
    Switching { from: Mode, to: Mode },
    Active { mode: Mode },
}

impl ArbiterState {
    /// State for a settled mode.
    pub fn settled(mode: Mode) -> Self {
        if mode.is_idle() {
            ArbiterState::Idle
        } else {
            ArbiterState::Active { mode }
        }
    }

    /// The mode the modem is known to be in. While switching this is the
    /// outgoing mode.
    pub fn mode(&self) -> Mode {
        match *self {
            ArbiterState::Idle => Mode::Idle,
            ArbiterState::Switching { from, .. } => from,
            ArbiterState::Active { mode } => mode,
        }
    }

    pub fn is_switching(&self) -> bool {
        matches!(self, ArbiterState::Switching { .. })
    }
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbiterState::Idle => f.write_str("IDLE"),
            ArbiterState::Switching { from, to } => write!(f, "SWITCHING({from} -> {to})"),
            ArbiterState::Active { mode } => write!(f, "ACTIVE({mode})"),
        }
    }
}

/// What caused a mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchTrigger {
    /// Received traffic for another protocol.
    Rf,
    /// Network traffic for another protocol.
    Network,
    /// Explicit request.
    Command,
    /// Both hang timers of the active mode ran out.
    HangTimer,
    /// The modem reported lockout or an error.
    Lockout,
    /// Fixed mode entered after the handshake.
    Startup,
    /// The link was re-initialized after becoming unresponsive.
    LinkFailure,
    /// Host teardown.
    Shutdown,
}

impl SwitchTrigger {
    /// Triggers allowed to preempt a switch in progress.
    pub fn forces_idle(self) -> bool {
        matches!(
            self,
            SwitchTrigger::Command
                | SwitchTrigger::Lockout
                | SwitchTrigger::LinkFailure
                | SwitchTrigger::Shutdown
        )
    }
}

/// First frame of the incoming mode, held while a switch completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    Rf(DataChannel, Bytes),
    Network(Bytes),
}

/// Arbiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArbiterStats {
    pub switches: u64,
    pub failed_switches: u64,
    /// Outgoing-mode frames discarded mid-switch.
    pub dropped_outgoing: u64,
    /// Frames for a disabled or suppressed mode, or beyond the replay slot.
    pub dropped_inactive: u64,
    /// Frames a bridge had no room for.
    pub dropped_no_space: u64,
    pub replayed: u64,
    /// Transmit frames abandoned by a bounded drain.
    pub drain_lost: u64,
    /// Transmit frames put back after `NAK(busy)`.
    pub requeued: u64,
    pub reinitializations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mode() {
        assert_eq!(ArbiterState::Idle.mode(), Mode::Idle);
        assert_eq!(
            ArbiterState::Switching {
                from: Mode::Dmr,
                to: Mode::Ysf
            }
            .mode(),
            Mode::Dmr
        );
        assert_eq!(ArbiterState::settled(Mode::P25).mode(), Mode::P25);
        assert_eq!(ArbiterState::settled(Mode::Idle), ArbiterState::Idle);
    }

    #[test]
    fn test_state_display() {
        let state = ArbiterState::Switching {
            from: Mode::Dmr,
            to: Mode::Ysf,
        };
        assert_eq!(state.to_string(), "SWITCHING(DMR -> YSF)");
        assert!(state.is_switching());
    }

    #[test]
    fn test_state_json() {
        let json = serde_json::to_string(&ArbiterState::Active { mode: Mode::M17 }).unwrap();
        assert_eq!(json, r#"{"state":"active","mode":"m17"}"#);
    }

    #[test]
    fn test_idle_forcing_triggers() {
        assert!(SwitchTrigger::Shutdown.forces_idle());
        assert!(SwitchTrigger::LinkFailure.forces_idle());
        assert!(!SwitchTrigger::Rf.forces_idle());
        assert!(!SwitchTrigger::HangTimer.forces_idle());
    }
}
