use serde::Serialize;
use tokio::sync::broadcast;

use crate::arbiter::SwitchTrigger;
use crate::codec::{ModemStatus, ModemVersion};
use crate::protocol::{CommandType, DataChannel, Mode, NakCode};

/// Default number of events buffered for slow subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A condition surfaced by the link engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// Handshake completed.
    Connected { version: ModemVersion },
    /// The modem answered a status query.
    Status { status: ModemStatus },
    ModeChanged {
        from: Mode,
        to: Mode,
        trigger: SwitchTrigger,
    },
    /// A switch was aborted and `current` is still active.
    SwitchFailed {
        target: Mode,
        current: Mode,
        reason: String,
    },
    CommandTimeout { command: CommandType },
    CommandRejected { command: CommandType, code: NakCode },
    /// A keep-alive status query went unanswered.
    KeepAliveMissed { consecutive: u32 },
    /// The modem reported a full buffer; the channel is backing off.
    BufferBusy { channel: DataChannel, retry_ms: u64 },
    /// The modem rejected a data frame for a reason other than busy.
    DataRejected { channel: DataChannel, code: NakCode },
    FramingError { total: u64, discarded_bytes: u64 },
    /// Frames discarded because their mode was not active.
    FramesDropped { mode: Mode, count: u64 },
    /// The pre-switch drain hit its bound with frames still queued.
    DataLoss { mode: Mode, frames: u64 },
    LinkUnresponsive,
    Reinitialized,
    Lockout { active: bool },
    CwIdSent { callsign: String },
    Disconnected { reason: String },
}

/// Broadcast sender for [`LinkEvent`]s.
///
/// Publishing never fails; events with no subscribers are discarded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
