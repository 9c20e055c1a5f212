//! Mode arbiter - owns the active protocol and hot-swaps between them.
//!
//! The arbiter routes received traffic to the bridge of the active mode and
//! runs the switch sequence when another mode is wanted:
//!
//! 1. enter `Switching` so no new transmit is taken from the outgoing bridge
//! 2. drain what the outgoing bridge has queued, bounded in time
//! 3. set-mode; a timeout is checked with a status query and retried once
//! 4. wait for the modem to settle
//! 5. clear buffer accounting
//! 6. reset the incoming bridge
//! 7. enter the new mode, restart hang timers, replay the held frame
//!
//! Switches serialize on an async switch lock. Automatic triggers (RF,
//! network, hang expiry) only try the lock and give up if a switch is
//! running; idle-forcing requests raise a preempt flag and wait for it. An
//! aborted switch puts the outgoing mode back with its hang timers as they
//! were. Re-initialization also runs in `Switching`, toward IDLE. The mode
//! context itself sits behind a short synchronous lock that is never held
//! across an await.

pub mod hang;
mod state;

pub use hang::{HangConfig, HangTimer, HangTimers, DEFAULT_NET_HANG, DEFAULT_RF_HANG};
pub use state::{ArbiterState, ArbiterStats, Replay, SwitchTrigger};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::Instant;

use crate::bridge::BridgeSet;
use crate::codec::{ModemStatus, ModemVersion};
use crate::error::{LinkError, Result};
use crate::protocol::{CommandType, DataChannel, Direction, Mode};
use crate::session::{CommandOutcome, DataOutcome, Handshake, LinkSession};
use crate::status::LinkEvent;

/// Default wait after set-mode before traffic resumes.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Default bound on draining the outgoing mode's transmit queue.
pub const DEFAULT_DRAIN_BOUND: Duration = Duration::from_millis(200);

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Periodic CW identification while idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CwIdConfig {
    pub callsign: String,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub settle: Duration,
    pub drain_bound: Duration,
    /// Stay in the single enabled mode; ignore RF, network and hang triggers.
    pub fixed_mode: bool,
    pub hang: HashMap<Mode, HangConfig>,
    pub cw_id: Option<CwIdConfig>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            drain_bound: DEFAULT_DRAIN_BOUND,
            fixed_mode: false,
            hang: HashMap::new(),
            cw_id: None,
        }
    }
}

#[derive(Debug)]
struct ModeContext {
    state: ArbiterState,
    bridges: BridgeSet,
    hang: HangTimers,
    /// Hang timers of the outgoing mode, restored if the switch aborts.
    saved_hang: Option<HangTimers>,
    /// One-deep hold for the first incoming-mode frame of a switch.
    replay: Option<Replay>,
    lockout: bool,
    needs_reinit: bool,
    /// Outgoing-mode frames dropped during the current switch.
    switch_dropped: u64,
    stats: ArbiterStats,
    last_cw_id: Instant,
}

impl ModeContext {
    /// Enter `Switching`. Called with the switch lock held.
    fn begin_switch(&mut self, from: Mode, target: Mode, trigger: SwitchTrigger) {
        self.state = ArbiterState::Switching { from, to: target };
        self.switch_dropped = 0;
        if trigger == SwitchTrigger::HangTimer {
            self.saved_hang = None;
            self.hang.stop_all();
        } else {
            self.saved_hang = Some(self.hang.clone());
        }
    }

    fn hold_for_replay(&mut self, replay: Replay) {
        if self.replay.is_none() {
            self.replay = Some(replay);
        } else {
            self.stats.dropped_inactive += 1;
        }
    }

    /// Deliver the held frame to the new mode's bridge.
    fn replay_into(&mut self, mode: Mode, replay: Replay, now: Instant) -> bool {
        let Some(bridge) = self.bridges.get_mut(mode) else {
            return false;
        };
        match replay {
            Replay::Rf(channel, payload) if channel.mode() == Some(mode) => {
                bridge.on_rf_frame(channel, payload);
                self.hang.on_rf_traffic(mode, now);
                true
            }
            Replay::Network(payload) => {
                let accepted = bridge.on_network_frame(payload);
                self.hang.on_net_traffic(mode, now);
                accepted
            }
            Replay::Rf(..) => false,
        }
    }
}

/// Owner of the active mode.
#[derive(Debug)]
pub struct Arbiter {
    session: Arc<LinkSession>,
    config: ArbiterConfig,
    handshake: Handshake,
    ctx: Mutex<ModeContext>,
    switch_lock: Arc<AsyncMutex<()>>,
    /// Held while a frame moves from a bridge to the writer.
    tx_lock: AsyncMutex<()>,
    preempt: AtomicBool,
    failed: watch::Sender<bool>,
}

impl Arbiter {
    pub fn new(
        session: Arc<LinkSession>,
        bridges: BridgeSet,
        config: ArbiterConfig,
        handshake: Handshake,
    ) -> Self {
        let hang = HangTimers::new(
            bridges
                .modes()
                .into_iter()
                .map(|mode| (mode, config.hang.get(&mode).copied().unwrap_or_default())),
        );
        let (failed, _) = watch::channel(false);

        Self {
            session,
            config,
            handshake,
            ctx: Mutex::new(ModeContext {
                state: ArbiterState::Idle,
                bridges,
                hang,
                replay: None,
                lockout: false,
                needs_reinit: false,
                switch_dropped: 0,
                saved_hang: None,
                stats: ArbiterStats::default(),
                last_cw_id: Instant::now(),
            }),
            switch_lock: Arc::new(AsyncMutex::new(())),
            tx_lock: AsyncMutex::new(()),
            preempt: AtomicBool::new(false),
            failed,
        }
    }

    pub fn session(&self) -> &Arc<LinkSession> {
        &self.session
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn state(&self) -> ArbiterState {
        self.ctx.lock().state
    }

    /// The settled mode (the outgoing one while switching).
    pub fn mode(&self) -> Mode {
        self.state().mode()
    }

    pub fn stats(&self) -> ArbiterStats {
        self.ctx.lock().stats
    }

    pub fn enabled_modes(&self) -> Vec<Mode> {
        self.ctx.lock().bridges.modes()
    }

    pub fn is_locked_out(&self) -> bool {
        self.ctx.lock().lockout
    }

    pub fn needs_reinit(&self) -> bool {
        self.ctx.lock().needs_reinit
    }

    /// Time until the active mode would return to IDLE.
    pub fn hang_remaining(&self, now: Instant) -> Option<Duration> {
        let ctx = self.ctx.lock();
        match ctx.state {
            ArbiterState::Active { mode } => ctx.hang.remaining(mode, now),
            _ => None,
        }
    }

    /// Becomes `true` once the link is beyond recovery.
    pub fn failed(&self) -> watch::Receiver<bool> {
        self.failed.subscribe()
    }

    pub fn is_failed(&self) -> bool {
        *self.failed.borrow()
    }

    /// Run the modem handshake. Automatic switches are held off until it
    /// completes.
    pub async fn initialize(&self) -> Result<ModemVersion> {
        let _guard = self.switch_lock.lock().await;
        let version = self.session.initialize(&self.handshake).await?;

        let mut ctx = self.ctx.lock();
        ctx.state = ArbiterState::Idle;
        ctx.needs_reinit = false;
        ctx.last_cw_id = Instant::now();
        Ok(version)
    }

    /// Post-handshake actions: enter the fixed mode if configured.
    pub async fn start(&self) -> Result<()> {
        if !self.config.fixed_mode {
            return Ok(());
        }

        match self.enabled_modes().as_slice() {
            [mode] => {
                let _guard = self.switch_lock.lock().await;
                self.switch_locked(*mode, SwitchTrigger::Startup).await
            }
            modes => {
                tracing::warn!(
                    enabled = modes.len(),
                    "Fixed mode needs exactly one enabled protocol, staying IDLE"
                );
                Ok(())
            }
        }
    }

    /// Explicitly switch to `target`.
    ///
    /// IDLE preempts a switch in progress; any other target fails with
    /// `SwitchInProgress` while one is running.
    pub async fn request_mode(&self, target: Mode) -> Result<()> {
        if target.is_idle() {
            return self.force_idle(SwitchTrigger::Command).await;
        }
        let _guard = self
            .switch_lock
            .try_lock()
            .map_err(|_| LinkError::SwitchInProgress)?;
        self.switch_locked(target, SwitchTrigger::Command).await
    }

    /// Return to IDLE, preempting any switch in progress.
    pub async fn force_idle(&self, trigger: SwitchTrigger) -> Result<()> {
        let preempts = trigger.forces_idle();
        if preempts {
            self.preempt.store(true, Ordering::Release);
        }
        let _guard = self.switch_lock.lock().await;
        if preempts {
            self.preempt.store(false, Ordering::Release);
        }
        self.switch_locked(Mode::Idle, trigger).await
    }

    /// Send a paging frame regardless of the active mode.
    pub async fn send_paging(&self, payload: Bytes) -> Result<DataOutcome> {
        self.session.send_data(DataChannel::Pocsag, payload).await
    }

    /// Route a frame received off the air.
    pub fn on_rf_frame(self: &Arc<Self>, channel: DataChannel, payload: Bytes) {
        let Some(mode) = channel.mode() else {
            tracing::debug!(%channel, "No receive path for channel");
            return;
        };
        let now = Instant::now();
        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;

        match ctx.state {
            ArbiterState::Active { mode: active } if active == mode => {
                ctx.hang.on_rf_traffic(mode, now);
                if let Some(bridge) = ctx.bridges.get_mut(mode) {
                    if bridge.has_buffer_space(Direction::Rx) {
                        bridge.on_rf_frame(channel, payload);
                    } else {
                        ctx.stats.dropped_no_space += 1;
                    }
                }
            }
            ArbiterState::Switching { from, to } => {
                if mode == to {
                    ctx.hold_for_replay(Replay::Rf(channel, payload));
                } else if mode == from {
                    ctx.stats.dropped_outgoing += 1;
                    ctx.switch_dropped += 1;
                } else {
                    ctx.stats.dropped_inactive += 1;
                }
            }
            _ => {
                if !self.may_switch_automatically(ctx, mode)
                    || !self.try_begin_switch(
                        ctx,
                        mode,
                        SwitchTrigger::Rf,
                        Some(Replay::Rf(channel, payload)),
                    )
                {
                    ctx.stats.dropped_inactive += 1;
                }
            }
        }
    }

    /// Route a frame from a network collaborator.
    pub fn on_network_frame(self: &Arc<Self>, mode: Mode, payload: Bytes) {
        let now = Instant::now();
        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;

        match ctx.state {
            ArbiterState::Active { mode: active } if active == mode => {
                ctx.hang.on_net_traffic(mode, now);
                let accepted = match ctx.bridges.get_mut(mode) {
                    Some(bridge) if bridge.has_buffer_space(Direction::Tx) => {
                        bridge.on_network_frame(payload)
                    }
                    _ => false,
                };
                if !accepted {
                    ctx.stats.dropped_no_space += 1;
                }
            }
            ArbiterState::Switching { from, to } => {
                if mode == to {
                    ctx.hold_for_replay(Replay::Network(payload));
                } else if mode == from {
                    ctx.stats.dropped_outgoing += 1;
                    ctx.switch_dropped += 1;
                } else {
                    ctx.stats.dropped_inactive += 1;
                }
            }
            _ => {
                if !self.may_switch_automatically(ctx, mode)
                    || !self.try_begin_switch(
                        ctx,
                        mode,
                        SwitchTrigger::Network,
                        Some(Replay::Network(payload)),
                    )
                {
                    ctx.stats.dropped_inactive += 1;
                }
            }
        }
    }

    /// Put a frame the modem answered with `NAK(busy)` back at the head of
    /// its bridge. Dropped if its mode is no longer the one transmitting.
    pub fn requeue_transmit(&self, channel: DataChannel, payload: Bytes) {
        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;
        let transmitting = match ctx.state {
            ArbiterState::Active { mode } | ArbiterState::Switching { from: mode, .. } => mode,
            ArbiterState::Idle => Mode::Idle,
        };

        match ctx.bridges.get_mut(transmitting) {
            Some(bridge) if channel.mode() == Some(transmitting) => {
                tracing::debug!(%channel, "Busy frame requeued");
                bridge.requeue_transmit(channel, payload);
                ctx.stats.requeued += 1;
            }
            _ => ctx.stats.dropped_inactive += 1,
        }
    }

    /// React to a status reply: lockout and error force IDLE.
    pub fn on_status(self: &Arc<Self>, status: &ModemStatus) {
        let locked = status.is_locked_out();
        let leave_mode = {
            let mut ctx = self.ctx.lock();
            if ctx.lockout == locked {
                return;
            }
            ctx.lockout = locked;
            ctx.state != ArbiterState::Idle
        };

        self.session
            .events()
            .emit(LinkEvent::Lockout { active: locked });

        if !locked {
            tracing::info!("Modem lockout cleared");
            return;
        }

        tracing::warn!(
            lockout = status.lockout,
            error = status.error,
            "Modem reports lockout, forcing IDLE"
        );
        if leave_mode {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.force_idle(SwitchTrigger::Lockout).await {
                    this.on_switch_error(e);
                }
            });
        }
    }

    /// Periodic work: bridge housekeeping, hang expiry, CW ID and link
    /// re-validation.
    pub fn tick(self: &Arc<Self>, now: Instant) {
        if self.is_failed() {
            return;
        }
        let missed = self.session.missed_keepalives();

        let mut guard = self.ctx.lock();
        let ctx = &mut *guard;

        if missed >= 2 && !ctx.needs_reinit {
            ctx.needs_reinit = true;
            tracing::warn!(missed, "Modem stopped answering keep-alives");
            self.session.events().emit(LinkEvent::LinkUnresponsive);
        }

        if ctx.needs_reinit {
            if let Ok(guard) = self.switch_lock.clone().try_lock_owned() {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(e) = this.reinitialize().await {
                        this.on_switch_error(e);
                    }
                });
            }
            return;
        }

        match ctx.state {
            ArbiterState::Active { mode } => {
                if let Some(bridge) = ctx.bridges.get_mut(mode) {
                    bridge.tick(now);
                }
                if !self.config.fixed_mode && ctx.hang.expired(mode, now) {
                    tracing::info!(%mode, "Hang time expired");
                    self.try_begin_switch(ctx, Mode::Idle, SwitchTrigger::HangTimer, None);
                }
            }
            ArbiterState::Idle => {
                let Some(cw_id) = &self.config.cw_id else {
                    return;
                };
                if ctx.lockout || now.duration_since(ctx.last_cw_id) < cw_id.interval {
                    return;
                }
                if let Ok(guard) = self.switch_lock.clone().try_lock_owned() {
                    ctx.last_cw_id = now;
                    let this = Arc::clone(self);
                    let callsign = cw_id.callsign.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        this.send_cw_id(callsign).await;
                    });
                }
            }
            ArbiterState::Switching { .. } => {}
        }
    }

    /// Move queued network traffic of the active mode to the modem while
    /// buffer accounting allows. Returns the number of frames sent.
    pub async fn pump_transmit(&self) -> usize {
        let Ok(_tx) = self.tx_lock.try_lock() else {
            return 0;
        };
        let mut sent = 0;

        loop {
            let next = {
                let mut guard = self.ctx.lock();
                let ArbiterState::Active { mode } = guard.state else {
                    break;
                };
                let Some(bridge) = guard.bridges.get_mut(mode) else {
                    break;
                };
                match bridge.peek_transmit() {
                    Some((channel, len))
                        if self
                            .session
                            .accounting()
                            .can_send(channel, len, Instant::now()) =>
                    {
                        bridge.poll_transmit()
                    }
                    _ => None,
                }
            };
            let Some((channel, payload)) = next else {
                break;
            };

            match self.session.send_data(channel, payload).await {
                Ok(DataOutcome::Accepted) => sent += 1,
                Ok(DataOutcome::Rejected(code)) => {
                    tracing::debug!(%channel, %code, "Transmit frame dropped");
                    self.ctx.lock().stats.dropped_no_space += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!(%channel, error = %e, "Transmit failed");
                    break;
                }
            }
        }

        sent
    }

    fn may_switch_automatically(&self, ctx: &ModeContext, mode: Mode) -> bool {
        !self.config.fixed_mode
            && !ctx.lockout
            && !ctx.needs_reinit
            && ctx.bridges.contains(mode)
            && !self.is_failed()
    }

    /// Start an automatic switch if no switch is running. Called with the
    /// context lock held.
    fn try_begin_switch(
        self: &Arc<Self>,
        ctx: &mut ModeContext,
        target: Mode,
        trigger: SwitchTrigger,
        replay: Option<Replay>,
    ) -> bool {
        let Ok(guard) = self.switch_lock.clone().try_lock_owned() else {
            tracing::debug!(%target, ?trigger, "Switch already running");
            return false;
        };

        let from = ctx.state.mode();
        ctx.begin_switch(from, target, trigger);
        ctx.replay = replay;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.run_switch(from, target, trigger).await {
                this.on_switch_error(e);
            }
        });
        true
    }

    /// Validate and run a switch. The caller holds the switch lock.
    async fn switch_locked(&self, target: Mode, trigger: SwitchTrigger) -> Result<()> {
        if self.is_failed() {
            return Err(LinkError::LinkUnresponsive);
        }
        if self.needs_reinit() {
            self.reinitialize().await?;
        }

        let from = {
            let mut ctx = self.ctx.lock();
            if !target.is_idle() && !ctx.bridges.contains(target) {
                return Err(LinkError::ProtocolDisabled(target));
            }
            if !target.is_idle() && ctx.lockout {
                return Err(LinkError::ModeSwitch {
                    target,
                    reason: "modem locked out".into(),
                });
            }
            let from = ctx.state.mode();
            if from == target {
                return Ok(());
            }
            ctx.begin_switch(from, target, trigger);
            ctx.replay = None;
            from
        };

        self.run_switch(from, target, trigger).await
    }

    /// Steps 2 to 7 of the switch sequence. State is already `Switching`.
    async fn run_switch(&self, from: Mode, target: Mode, trigger: SwitchTrigger) -> Result<()> {
        tracing::info!(%from, %target, ?trigger, "Mode switch starting");

        let rejected = self.drain(from, target).await;

        if self.preempted(target) {
            return self.abort_switch(from, target, "preempted by idle request".into());
        }

        match self.session.set_mode(target).await {
            Ok(CommandOutcome::Ack(_)) => {}
            Ok(CommandOutcome::Nak(code)) => {
                self.session.events().emit(LinkEvent::CommandRejected {
                    command: CommandType::SetMode,
                    code,
                });
                return self.abort_switch(from, target, format!("modem rejected set-mode: {code}"));
            }
            Ok(CommandOutcome::Timeout) => self.recover_set_mode(from, target).await?,
            Err(e) => return self.abort_switch(from, target, e.to_string()),
        }

        tokio::time::sleep(self.config.settle).await;

        self.session.accounting().clear();

        self.commit(from, target, trigger, rejected);
        Ok(())
    }

    /// Bounded drain of the outgoing bridge. Returns frames the session
    /// refused.
    async fn drain(&self, from: Mode, target: Mode) -> u64 {
        let _tx = self.tx_lock.lock().await;
        let deadline = Instant::now() + self.config.drain_bound;
        let mut rejected = 0;

        while !from.is_idle() && !self.preempted(target) {
            let next = {
                let mut ctx = self.ctx.lock();
                let Some(bridge) = ctx.bridges.get_mut(from) else {
                    break;
                };
                match bridge.peek_transmit() {
                    None => break,
                    Some((channel, len)) => {
                        if self
                            .session
                            .accounting()
                            .can_send(channel, len, Instant::now())
                        {
                            bridge.poll_transmit()
                        } else {
                            None
                        }
                    }
                }
            };

            match next {
                Some((channel, payload)) => {
                    if !matches!(
                        self.session.send_data(channel, payload).await,
                        Ok(DataOutcome::Accepted)
                    ) {
                        rejected += 1;
                    }
                }
                None => tokio::time::sleep(DRAIN_POLL).await,
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let writer = self.session.writer();
        if !writer.flush(remaining).await {
            tracing::warn!(
                pending = writer.pending_count(),
                "Transmit queue not empty before set-mode"
            );
        }

        rejected
    }

    /// Set-mode timed out: confirm the link with a status query and retry
    /// once, or declare it unresponsive.
    async fn recover_set_mode(&self, from: Mode, target: Mode) -> Result<()> {
        tracing::warn!(%target, "Set-mode timed out, checking link");

        if let Ok(Some(_)) = self.session.query_status().await {
            match self.session.set_mode(target).await {
                Ok(CommandOutcome::Ack(_)) => return Ok(()),
                Ok(CommandOutcome::Nak(code)) => {
                    self.session.events().emit(LinkEvent::CommandRejected {
                        command: CommandType::SetMode,
                        code,
                    });
                    return self.abort_switch(
                        from,
                        target,
                        format!("modem rejected set-mode: {code}"),
                    );
                }
                Ok(CommandOutcome::Timeout) | Err(_) => {}
            }
        }

        self.link_unresponsive(target).await
    }

    /// Two consecutive timeouts: re-initialize before anything else.
    async fn link_unresponsive(&self, target: Mode) -> Result<()> {
        {
            let mut ctx = self.ctx.lock();
            ctx.needs_reinit = true;
            ctx.stats.failed_switches += 1;
        }
        tracing::error!(%target, "Modem link unresponsive");
        self.session.events().emit(LinkEvent::LinkUnresponsive);

        self.reinitialize().await?;

        let reason = "link unresponsive, modem re-initialized".to_string();
        self.session.events().emit(LinkEvent::SwitchFailed {
            target,
            current: Mode::Idle,
            reason: reason.clone(),
        });
        Err(LinkError::ModeSwitch { target, reason })
    }

    /// Run the handshake again and settle in IDLE.
    ///
    /// Failure here is fatal.
    async fn reinitialize(&self) -> Result<()> {
        tracing::warn!("Re-initializing modem link");

        {
            let mut ctx = self.ctx.lock();
            let from = ctx.state.mode();
            ctx.state = ArbiterState::Switching {
                from,
                to: Mode::Idle,
            };
            ctx.replay = None;
            ctx.saved_hang = None;
            ctx.switch_dropped = 0;
        }

        if let Err(e) = self.session.initialize(&self.handshake).await {
            tracing::error!(error = %e, "Modem re-initialization failed");
            self.fail(&LinkError::LinkUnresponsive);
            return Err(LinkError::LinkUnresponsive);
        }

        let from = {
            let mut guard = self.ctx.lock();
            let ctx = &mut *guard;
            let from = ctx.state.mode();
            if let Some(bridge) = ctx.bridges.get_mut(from) {
                bridge.reset();
            }
            ctx.state = ArbiterState::Idle;
            ctx.needs_reinit = false;
            ctx.saved_hang = None;
            ctx.replay = None;
            ctx.hang.stop_all();
            ctx.stats.reinitializations += 1;
            from
        };

        self.session.events().emit(LinkEvent::Reinitialized);
        if !from.is_idle() {
            self.session.events().emit(LinkEvent::ModeChanged {
                from,
                to: Mode::Idle,
                trigger: SwitchTrigger::LinkFailure,
            });
        }
        Ok(())
    }

    /// Restore the prior mode after a failed switch.
    fn abort_switch(&self, from: Mode, target: Mode, reason: String) -> Result<()> {
        let dropped = {
            let mut ctx = self.ctx.lock();
            ctx.state = ArbiterState::settled(from);
            match ctx.saved_hang.take() {
                Some(saved) => ctx.hang = saved,
                None if !from.is_idle() => ctx.hang.enter(from, Instant::now()),
                None => {}
            }
            ctx.replay = None;
            ctx.stats.failed_switches += 1;
            std::mem::take(&mut ctx.switch_dropped)
        };

        tracing::warn!(%from, %target, %reason, "Mode switch aborted");
        let events = self.session.events();
        if dropped > 0 {
            events.emit(LinkEvent::FramesDropped {
                mode: from,
                count: dropped,
            });
        }
        events.emit(LinkEvent::SwitchFailed {
            target,
            current: from,
            reason: reason.clone(),
        });
        Err(LinkError::ModeSwitch { target, reason })
    }

    /// Steps 6 and 7: reset the incoming bridge and enter the new mode.
    fn commit(&self, from: Mode, target: Mode, trigger: SwitchTrigger, rejected: u64) {
        let now = Instant::now();
        let (lost, dropped, replayed) = {
            let mut guard = self.ctx.lock();
            let ctx = &mut *guard;

            let mut lost = rejected;
            if let Some(outgoing) = ctx.bridges.get_mut(from) {
                lost += outgoing.pending_transmit() as u64;
                outgoing.reset();
            }
            if let Some(incoming) = ctx.bridges.get_mut(target) {
                incoming.reset();
            }

            ctx.state = ArbiterState::settled(target);
            ctx.saved_hang = None;
            if target.is_idle() {
                ctx.hang.stop_all();
                ctx.last_cw_id = now;
            } else {
                ctx.hang.enter(target, now);
            }
            ctx.stats.switches += 1;
            ctx.stats.drain_lost += lost;

            let replayed = match ctx.replay.take() {
                Some(replay) => ctx.replay_into(target, replay, now),
                None => false,
            };
            if replayed {
                ctx.stats.replayed += 1;
            }

            (lost, std::mem::take(&mut ctx.switch_dropped), replayed)
        };

        tracing::info!(%from, %target, ?trigger, replayed, "Mode changed");

        let events = self.session.events();
        if lost > 0 {
            tracing::warn!(mode = %from, frames = lost, "Drain bound exceeded, transmit data lost");
            events.emit(LinkEvent::DataLoss {
                mode: from,
                frames: lost,
            });
        }
        if dropped > 0 {
            events.emit(LinkEvent::FramesDropped {
                mode: from,
                count: dropped,
            });
        }
        events.emit(LinkEvent::ModeChanged {
            from,
            to: target,
            trigger,
        });
    }

    async fn send_cw_id(&self, callsign: String) {
        match self
            .session
            .expect_ack(CommandType::SendCwId, callsign.as_bytes())
            .await
        {
            Ok(_) => {
                tracing::debug!(%callsign, "CW ID sent");
                self.session
                    .events()
                    .emit(LinkEvent::CwIdSent { callsign });
            }
            Err(e) => tracing::warn!(error = %e, "CW ID failed"),
        }
    }

    fn preempted(&self, target: Mode) -> bool {
        !target.is_idle() && self.preempt.load(Ordering::Acquire)
    }

    fn on_switch_error(&self, error: LinkError) {
        if error.is_fatal() {
            self.fail(&error);
        } else {
            tracing::debug!(error = %error, "Automatic switch did not complete");
        }
    }

    /// Mark the link as beyond recovery.
    pub(crate) fn fail(&self, error: &LinkError) {
        if self.failed.send_replace(true) {
            return;
        }
        tracing::error!(error = %error, "Modem link failed");
        self.session.events().emit(LinkEvent::Disconnected {
            reason: error.to_string(),
        });
    }
}
