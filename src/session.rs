//! Link session - command correlation, keep-alive and data transmit.
//!
//! The command channel is half duplex: at most one command waits for its
//! reply at any time. A second [`LinkSession::send_command`] while one is
//! pending fails at once with [`LinkError::CommandBusy`] and leaves the
//! pending command alone.
//!
//! Data frames bypass that rule. They are gated by [`BufferAccounting`]
//! instead, and a `NAK(busy)` naming a data type puts that channel into
//! exponential backoff rather than resolving any command. The last frame
//! sent on each channel is kept until the next status report so a busy NAK
//! can hand it back for retransmission.
//!
//! A command answered `NAK(busy)` is resent after the same backoff, up to
//! [`COMMAND_BUSY_RETRIES`] times.
//!
//! The session never reads the port itself. The host's read loop feeds every
//! decoded frame to [`LinkSession::on_frame`], which resolves the pending
//! command or hands data frames back for routing.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::backpressure::{Backoff, BufferAccounting, DEFAULT_RETRY_BASE, DEFAULT_RETRY_CAP};
use crate::codec::{ModemConfig, ModemLevels, ModemStatus, ModemVersion, ModeParams};
use crate::error::{LinkError, Result};
use crate::protocol::{CommandType, DataChannel, Frame, FrameKind, Mode, NakCode};
use crate::status::{EventBus, LinkEvent};
use crate::writer::WriterHandle;

/// Default time to wait for an Ack/Nak.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(100);

/// Default time to wait for a data frame to be queued.
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_millis(20);

/// Default command silence before a keep-alive status query.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of get-version attempts during the handshake.
pub const DEFAULT_VERSION_ATTEMPTS: u32 = 6;

/// Resends of a command the modem answered `NAK(busy)`.
pub const COMMAND_BUSY_RETRIES: u32 = 4;

/// Result of one command attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Positive reply; carries the reply payload for get-version and
    /// get-status, empty for a bare Ack.
    Ack(Bytes),
    Nak(NakCode),
    Timeout,
}

/// Result of handing a data frame to the modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    Accepted,
    Rejected(NakCode),
}

/// Session timing and buffer parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command_timeout: Duration,
    pub data_timeout: Duration,
    pub keepalive_interval: Duration,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub version_attempts: u32,
    /// Per-channel TX buffer sizes overriding the defaults.
    pub tx_capacities: HashMap<DataChannel, usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            retry_base: DEFAULT_RETRY_BASE,
            retry_cap: DEFAULT_RETRY_CAP,
            version_attempts: DEFAULT_VERSION_ATTEMPTS,
            tx_capacities: HashMap::new(),
        }
    }
}

/// Payloads pushed to the modem by [`LinkSession::initialize`].
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub config: ModemConfig,
    pub levels: Option<ModemLevels>,
    /// Per-mode parameters, pushed for enabled modes the firmware supports.
    pub mode_params: Vec<ModeParams>,
}

/// The command awaiting its reply.
#[derive(Debug)]
struct PendingCommand {
    id: u64,
    command: CommandType,
    deadline: Instant,
    /// `None` for keep-alive queries nobody awaits.
    waiter: Option<oneshot::Sender<CommandOutcome>>,
}

#[derive(Debug)]
struct LinkState {
    pending: Option<PendingCommand>,
    next_id: u64,
    last_send: Option<Instant>,
    last_command: Instant,
    last_keepalive: Option<Instant>,
    missed_keepalives: u32,
    version: Option<ModemVersion>,
    status: Option<ModemStatus>,
    /// Last frame sent per channel since the last status report.
    in_flight: HashMap<DataChannel, Bytes>,
}

/// What the read loop should do with a frame after the session saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Received traffic for routing to a bridge.
    Data(DataChannel, Bytes),
    /// A status reply was applied.
    Status(ModemStatus),
    /// The modem was busy; this frame goes back to the front of its queue.
    Requeue(DataChannel, Bytes),
    /// Nothing further to do.
    Handled,
}

/// Request/response pairing and transmit gating for one modem link.
#[derive(Debug)]
pub struct LinkSession {
    writer: WriterHandle,
    accounting: BufferAccounting,
    events: EventBus,
    config: SessionConfig,
    state: Mutex<LinkState>,
    /// `true` while a command is pending.
    busy: watch::Sender<bool>,
}

impl LinkSession {
    pub fn new(writer: WriterHandle, events: EventBus, config: SessionConfig) -> Self {
        let accounting = BufferAccounting::with_capacities(
            &config.tx_capacities,
            config.retry_base,
            config.retry_cap,
        );
        let (busy, _) = watch::channel(false);

        Self {
            writer,
            accounting,
            events,
            config,
            state: Mutex::new(LinkState {
                pending: None,
                next_id: 0,
                last_send: None,
                last_command: Instant::now(),
                last_keepalive: None,
                missed_keepalives: 0,
                version: None,
                status: None,
                in_flight: HashMap::new(),
            }),
            busy,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn accounting(&self) -> &BufferAccounting {
        &self.accounting
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Version reported during the last handshake.
    pub fn version(&self) -> Option<ModemVersion> {
        self.state.lock().version.clone()
    }

    /// Most recent status reply.
    pub fn last_status(&self) -> Option<ModemStatus> {
        self.state.lock().status.clone()
    }

    pub fn last_send(&self) -> Option<Instant> {
        self.state.lock().last_send
    }

    pub fn last_keepalive(&self) -> Option<Instant> {
        self.state.lock().last_keepalive
    }

    /// Type of the command awaiting a reply, if any.
    pub fn pending_command(&self) -> Option<CommandType> {
        self.state.lock().pending.as_ref().map(|p| p.command)
    }

    /// Send one command and wait for its Ack, Nak or timeout.
    ///
    /// Fails with `CommandBusy` if another command is pending.
    pub async fn send_command(
        &self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<CommandOutcome> {
        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = now + self.config.command_timeout;

        let id = {
            let mut state = self.state.lock();
            if let Some(pending) = &state.pending {
                return Err(LinkError::CommandBusy(pending.command));
            }
            let id = state.next_id;
            state.next_id = state.next_id.wrapping_add(1);
            state.pending = Some(PendingCommand {
                id,
                command,
                deadline,
                waiter: Some(tx),
            });
            state.last_command = now;
            state.last_send = Some(now);
            id
        };
        self.busy.send_replace(true);

        tracing::debug!(%command, len = payload.len(), "Sending command");

        if let Err(e) = self.writer.send(&Frame::command(command, payload)).await {
            self.take_pending(id);
            return Err(e);
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(LinkError::ConnectionClosed),
            Err(_) => {
                if self.take_pending(id).is_some() {
                    tracing::warn!(%command, "Command timed out");
                    self.events.emit(LinkEvent::CommandTimeout { command });
                    return Ok(CommandOutcome::Timeout);
                }
                // The reply raced the deadline and won.
                rx.try_recv().or(Ok(CommandOutcome::Timeout))
            }
        }
    }

    /// Like [`send_command`](Self::send_command), but first waits (up to one
    /// command timeout) for a pending command to finish.
    ///
    /// Used by internal sequences that must not lose to a keep-alive query.
    pub async fn send_command_when_idle(
        &self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<CommandOutcome> {
        let deadline = Instant::now() + self.config.command_timeout * 2;
        let mut busy = self.busy.subscribe();

        loop {
            match self.send_command(command, payload).await {
                Err(LinkError::CommandBusy(other)) => {
                    let cleared =
                        tokio::time::timeout_at(deadline, busy.wait_for(|pending| !pending))
                            .await
                            .map(|changed| changed.is_ok())
                            .unwrap_or(false);
                    if !cleared {
                        return Err(LinkError::CommandBusy(other));
                    }
                }
                result => return result,
            }
        }
    }

    /// Like [`send_command_when_idle`](Self::send_command_when_idle), but a
    /// `NAK(busy)` is answered by waiting out an exponential backoff and
    /// sending again.
    pub async fn send_command_retrying(
        &self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<CommandOutcome> {
        let mut backoff = Backoff::new(self.config.retry_base, self.config.retry_cap);

        loop {
            match self.send_command_when_idle(command, payload).await? {
                CommandOutcome::Nak(NakCode::Busy) if backoff.attempts() < COMMAND_BUSY_RETRIES => {
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        %command,
                        retry_ms = delay.as_millis() as u64,
                        "Modem busy, resending command"
                    );
                    tokio::time::sleep(delay).await;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// Send a command expecting an Ack, retrying once on timeout.
    ///
    /// Returns the reply payload.
    pub async fn expect_ack(&self, command: CommandType, payload: &[u8]) -> Result<Bytes> {
        for attempt in 1..=2 {
            match self.send_command_retrying(command, payload).await? {
                CommandOutcome::Ack(reply) => return Ok(reply),
                CommandOutcome::Nak(code) => {
                    self.events.emit(LinkEvent::CommandRejected { command, code });
                    return Err(LinkError::Nak { command, code });
                }
                CommandOutcome::Timeout => {
                    tracing::debug!(%command, attempt, "No reply");
                }
            }
        }
        Err(LinkError::CommandTimeout(command))
    }

    /// Query modem status. `None` if the query timed out.
    pub async fn query_status(&self) -> Result<Option<ModemStatus>> {
        match self
            .send_command_retrying(CommandType::GetStatus, &[])
            .await?
        {
            CommandOutcome::Ack(payload) => Ok(Some(ModemStatus::decode(&payload)?)),
            CommandOutcome::Nak(code) => Err(LinkError::Nak {
                command: CommandType::GetStatus,
                code,
            }),
            CommandOutcome::Timeout => Ok(None),
        }
    }

    /// Ask the modem to enter `mode`. Busy replies are retried; a timeout is
    /// left to the caller.
    pub async fn set_mode(&self, mode: Mode) -> Result<CommandOutcome> {
        self.send_command_retrying(CommandType::SetMode, &[mode.as_u8()])
            .await
    }

    /// Run the handshake: version query, configuration, optional levels,
    /// then IDLE.
    pub async fn initialize(&self, handshake: &Handshake) -> Result<ModemVersion> {
        let version = self.read_version().await?;

        tracing::info!(
            protocol = version.protocol,
            hardware = version.hardware,
            description = %version.description,
            "Modem version"
        );

        for mode in &handshake.config.enabled_modes {
            if !version.capabilities.supports(*mode) {
                tracing::warn!(%mode, "Modem firmware does not report support for mode");
            }
        }

        self.expect_ack(CommandType::SetConfig, &handshake.config.encode())
            .await?;

        if let Some(levels) = &handshake.levels {
            self.expect_ack(CommandType::SetModemConfig, &levels.encode())
                .await?;
        }

        for params in &handshake.mode_params {
            let mode = params.mode();
            if !handshake.config.enabled_modes.contains(&mode) {
                continue;
            }
            if !version.capabilities.supports(mode) {
                tracing::debug!(%mode, "Skipping mode parameters, not supported by firmware");
                continue;
            }
            self.expect_ack(params.command(), &params.encode()).await?;
        }

        self.expect_ack(CommandType::SetMode, &[Mode::Idle.as_u8()])
            .await?;

        self.accounting.clear();
        {
            let mut state = self.state.lock();
            state.version = Some(version.clone());
            state.missed_keepalives = 0;
        }

        tracing::info!("Modem handshake complete");
        self.events.emit(LinkEvent::Connected {
            version: version.clone(),
        });

        Ok(version)
    }

    async fn read_version(&self) -> Result<ModemVersion> {
        let attempts = self.config.version_attempts.max(1);

        for attempt in 1..=attempts {
            match self
                .send_command_retrying(CommandType::GetVersion, &[])
                .await?
            {
                CommandOutcome::Ack(payload) => return ModemVersion::decode(&payload),
                CommandOutcome::Nak(code) => {
                    return Err(LinkError::Nak {
                        command: CommandType::GetVersion,
                        code,
                    })
                }
                CommandOutcome::Timeout => {
                    tracing::warn!(attempt, attempts, "No version reply from modem");
                }
            }
        }

        Err(LinkError::CommandTimeout(CommandType::GetVersion))
    }

    /// Hand a data frame to the modem.
    ///
    /// Returns `Rejected(Busy)` without sending while the channel is short of
    /// space or backing off.
    pub async fn send_data(&self, channel: DataChannel, payload: Bytes) -> Result<DataOutcome> {
        let len = payload.len();
        if self
            .accounting
            .try_reserve(channel, len, Instant::now())
            .is_err()
        {
            tracing::trace!(%channel, len, "Data held back, modem buffer full");
            return Ok(DataOutcome::Rejected(NakCode::Busy));
        }

        let frame = Frame::data(channel, payload.clone());
        match tokio::time::timeout(self.config.data_timeout, self.writer.send(&frame)).await {
            Ok(Ok(())) => {
                let mut state = self.state.lock();
                state.last_send = Some(Instant::now());
                state.in_flight.insert(channel, payload);
                Ok(DataOutcome::Accepted)
            }
            Ok(Err(LinkError::QueueFull)) | Err(_) => {
                self.accounting.release(channel, len);
                Ok(DataOutcome::Rejected(NakCode::Busy))
            }
            Ok(Err(e)) => {
                self.accounting.release(channel, len);
                Err(e)
            }
        }
    }

    /// Process one decoded frame from the modem.
    pub fn on_frame(&self, frame: Frame) -> Inbound {
        match frame.kind() {
            FrameKind::Data(channel) => Inbound::Data(channel, frame.payload),
            FrameKind::Ack => {
                self.on_ack(&frame);
                Inbound::Handled
            }
            FrameKind::Nak => match self.on_nak(&frame) {
                Some((channel, payload)) => Inbound::Requeue(channel, payload),
                None => Inbound::Handled,
            },
            FrameKind::Command(CommandType::GetStatus) => match ModemStatus::decode(&frame.payload)
            {
                Ok(status) => {
                    self.apply_status(&status);
                    self.resolve(CommandType::GetStatus, CommandOutcome::Ack(frame.payload));
                    Inbound::Status(status)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed status reply");
                    Inbound::Handled
                }
            },
            FrameKind::Command(CommandType::GetVersion) => {
                self.resolve(CommandType::GetVersion, CommandOutcome::Ack(frame.payload));
                Inbound::Handled
            }
            FrameKind::Command(other) => {
                tracing::debug!(command = %other, "Ignoring command echoed by modem");
                Inbound::Handled
            }
            FrameKind::Unknown(kind @ 0xF1..=0xF5) => {
                tracing::debug!(
                    kind = format_args!("0x{kind:02X}"),
                    text = %String::from_utf8_lossy(&frame.payload),
                    "Modem debug"
                );
                Inbound::Handled
            }
            FrameKind::Unknown(kind) => {
                tracing::debug!(
                    kind = format_args!("0x{kind:02X}"),
                    len = frame.payload_len(),
                    "Unknown frame type"
                );
                Inbound::Handled
            }
        }
    }

    fn on_ack(&self, frame: &Frame) {
        let pending = self.pending_command();
        match (pending, frame.acked_type()) {
            (Some(command), Some(acked)) if acked == command.as_u8() => {
                self.resolve(command, CommandOutcome::Ack(Bytes::new()));
            }
            // Old firmware sends a bare Ack.
            (Some(command), None) => {
                self.resolve(command, CommandOutcome::Ack(Bytes::new()));
            }
            (_, acked) => {
                tracing::debug!(?acked, ?pending, "Unexpected Ack");
            }
        }
    }

    /// Returns the refused frame when a busy data channel has one to resend.
    fn on_nak(&self, frame: &Frame) -> Option<(DataChannel, Bytes)> {
        let Some((code, failed)) = frame.nak_details() else {
            tracing::warn!(len = frame.payload_len(), "Malformed Nak");
            return None;
        };

        if let Some(channel) = DataChannel::from_u8(failed) {
            let refused = self.state.lock().in_flight.remove(&channel);
            if let Some(payload) = &refused {
                self.accounting.release(channel, payload.len());
            }

            if code == NakCode::Busy {
                let delay = self.accounting.on_busy(channel, Instant::now());
                tracing::debug!(%channel, retry_ms = delay.as_millis() as u64, "Modem buffer busy");
                self.events.emit(LinkEvent::BufferBusy {
                    channel,
                    retry_ms: delay.as_millis() as u64,
                });
                return refused.map(|payload| (channel, payload));
            }

            tracing::warn!(%channel, %code, "Modem rejected data");
            self.events.emit(LinkEvent::DataRejected { channel, code });
            return None;
        }

        match CommandType::from_u8(failed) {
            Some(command) if self.pending_command() == Some(command) => {
                tracing::warn!(%command, %code, "Modem rejected command");
                self.resolve(command, CommandOutcome::Nak(code));
            }
            _ => {
                tracing::debug!(
                    failed = format_args!("0x{failed:02X}"),
                    %code,
                    "Nak for nothing pending"
                );
            }
        }
        None
    }

    /// Complete the pending command if it is `command`.
    fn resolve(&self, command: CommandType, outcome: CommandOutcome) {
        let resolved = {
            let mut state = self.state.lock();
            match state.pending.take() {
                Some(pending) if pending.command == command => {
                    // Any answer ends a run of missed keep-alives.
                    state.missed_keepalives = 0;
                    match pending.waiter {
                        Some(waiter) => {
                            let _ = waiter.send(outcome);
                        }
                        None => {
                            state.last_keepalive = Some(Instant::now());
                        }
                    }
                    true
                }
                other => {
                    state.pending = other;
                    false
                }
            }
        };

        if resolved {
            self.busy.send_replace(false);
        }
    }

    fn take_pending(&self, id: u64) -> Option<PendingCommand> {
        let taken = {
            let mut state = self.state.lock();
            match &state.pending {
                Some(p) if p.id == id => state.pending.take(),
                _ => None,
            }
        };
        if taken.is_some() {
            self.busy.send_replace(false);
        }
        taken
    }

    fn apply_status(&self, status: &ModemStatus) {
        for (channel, free) in &status.free_space {
            self.accounting.update_space(*channel, *free as usize);
        }
        {
            let mut state = self.state.lock();
            state.status = Some(status.clone());
            state.in_flight.clear();
        }
        tracing::trace!(
            mode = status.mode_byte,
            tx = status.tx,
            cd = status.carrier_detect,
            "Modem status"
        );
        self.events.emit(LinkEvent::Status {
            status: status.clone(),
        });
    }

    /// Drive keep-alive. Called by the scheduler every few milliseconds.
    ///
    /// Expires an unanswered keep-alive query and starts a new one after the
    /// configured silence on the command channel.
    pub fn tick(&self, now: Instant) {
        let mut missed = None;
        let mut issue = false;

        {
            let mut state = self.state.lock();

            let expired = matches!(
                &state.pending,
                Some(p) if p.waiter.is_none() && now >= p.deadline
            );
            if expired {
                state.pending = None;
                state.missed_keepalives = state.missed_keepalives.saturating_add(1);
                missed = Some(state.missed_keepalives);
            }

            if state.pending.is_none()
                && now.duration_since(state.last_command) >= self.config.keepalive_interval
            {
                let id = state.next_id;
                state.next_id = state.next_id.wrapping_add(1);
                state.pending = Some(PendingCommand {
                    id,
                    command: CommandType::GetStatus,
                    deadline: now + self.config.command_timeout,
                    waiter: None,
                });
                state.last_command = now;
                state.last_send = Some(now);
                issue = true;
            }
        }

        if let Some(consecutive) = missed {
            self.busy.send_replace(false);
            tracing::warn!(consecutive, "Keep-alive status query timed out");
            self.events.emit(LinkEvent::CommandTimeout {
                command: CommandType::GetStatus,
            });
            self.events
                .emit(LinkEvent::KeepAliveMissed { consecutive });
        }

        if issue {
            self.busy.send_replace(true);
            let frame = Frame::command(CommandType::GetStatus, &[]);
            if let Err(e) = self.writer.try_send(&frame) {
                tracing::debug!(error = %e, "Keep-alive not queued");
                let mut state = self.state.lock();
                if matches!(&state.pending, Some(p) if p.waiter.is_none()) {
                    state.pending = None;
                }
                drop(state);
                self.busy.send_replace(false);
            }
        }
    }

    /// Consecutive unanswered keep-alive queries.
    pub fn missed_keepalives(&self) -> u32 {
        self.state.lock().missed_keepalives
    }
}
