//! Per-protocol hang timers.
//!
//! Each enabled protocol has an RF timer and a network timer. Entering a mode
//! starts both; traffic restarts the one for its direction. When both have
//! run out for the active mode, the arbiter returns the modem to IDLE.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::Mode;

/// Default RF hang, matching MMDVMHost.
pub const DEFAULT_RF_HANG: Duration = Duration::from_secs(10);

/// Default network hang, matching MMDVMHost.
pub const DEFAULT_NET_HANG: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HangTimer {
    duration: Duration,
    deadline: Option<Instant>,
}

impl HangTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// (Re)start from `now`.
    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.duration);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn has_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// RF and network hang for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HangConfig {
    pub rf: Duration,
    pub net: Duration,
}

impl Default for HangConfig {
    fn default() -> Self {
        Self {
            rf: DEFAULT_RF_HANG,
            net: DEFAULT_NET_HANG,
        }
    }
}

#[derive(Debug, Clone)]
struct ModeHang {
    rf: HangTimer,
    net: HangTimer,
}

/// Hang timers of every enabled protocol. At most one mode's timers run.
#[derive(Debug, Clone, Default)]
pub struct HangTimers {
    timers: HashMap<Mode, ModeHang>,
}

impl HangTimers {
    pub fn new<I>(modes: I) -> Self
    where
        I: IntoIterator<Item = (Mode, HangConfig)>,
    {
        let timers = modes
            .into_iter()
            .filter(|(mode, _)| !mode.is_idle())
            .map(|(mode, config)| {
                (
                    mode,
                    ModeHang {
                        rf: HangTimer::new(config.rf),
                        net: HangTimer::new(config.net),
                    },
                )
            })
            .collect();
        Self { timers }
    }

    /// Start both timers of `mode` and stop everyone else's.
    pub fn enter(&mut self, mode: Mode, now: Instant) {
        for (m, hang) in self.timers.iter_mut() {
            if *m == mode {
                hang.rf.start(now);
                hang.net.start(now);
            } else {
                hang.rf.stop();
                hang.net.stop();
            }
        }
    }

    pub fn on_rf_traffic(&mut self, mode: Mode, now: Instant) {
        if let Some(hang) = self.timers.get_mut(&mode) {
            hang.rf.start(now);
        }
    }

    pub fn on_net_traffic(&mut self, mode: Mode, now: Instant) {
        if let Some(hang) = self.timers.get_mut(&mode) {
            hang.net.start(now);
        }
    }

    pub fn stop_all(&mut self) {
        for hang in self.timers.values_mut() {
            hang.rf.stop();
            hang.net.stop();
        }
    }

    /// True once both timers of `mode` have run out.
    pub fn expired(&self, mode: Mode, now: Instant) -> bool {
        self.timers
            .get(&mode)
            .map(|hang| hang.rf.has_expired(now) && hang.net.has_expired(now))
            .unwrap_or(false)
    }

    pub fn is_running(&self, mode: Mode) -> bool {
        self.timers
            .get(&mode)
            .map(|hang| hang.rf.is_running() || hang.net.is_running())
            .unwrap_or(false)
    }

    /// Time until `mode` would return to IDLE.
    pub fn remaining(&self, mode: Mode, now: Instant) -> Option<Duration> {
        let hang = self.timers.get(&mode)?;
        match (hang.rf.remaining(now), hang.net.remaining(now)) {
            (Some(rf), Some(net)) => Some(rf.max(net)),
            _ => None,
        }
    }
}
