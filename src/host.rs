//! Host builder and runtime loops.
//!
//! The [`HostBuilder`] collects bridges and configuration. [`Host`] runs the
//! link:
//! 1. Split the transport and spawn the writer task
//! 2. Spawn the read loop (frame decode → session → arbiter)
//! 3. Run the modem handshake
//! 4. Enter the fixed mode if configured
//! 5. Spawn the scheduler (keep-alive, hang timers, network input, transmit)
//!
//! # Example
//!
//! ```ignore
//! use mmdvm_link::{Host, protocol::Mode};
//!
//! #[tokio::main]
//! async fn main() -> mmdvm_link::Result<()> {
//!     let mut host = Host::builder()
//!         .forward(Mode::Dmr)
//!         .forward(Mode::Ysf)
//!         .open_serial("/dev/ttyACM0", 115_200)
//!         .await?;
//!
//!     let mut dmr = host.take_endpoint(Mode::Dmr).unwrap();
//!     tokio::spawn(async move {
//!         while let Some(frame) = dmr.recv().await {
//!             // hand to the DMR network
//!         }
//!     });
//!
//!     host.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::arbiter::{
    Arbiter, ArbiterConfig, ArbiterState, ArbiterStats, CwIdConfig, HangConfig, SwitchTrigger,
};
use crate::bridge::{Bridge, BridgeSet, ForwardingBridge, NetworkEndpoint, DEFAULT_NETWORK_QUEUE};
use crate::codec::{ModeParams, ModemConfig, ModemLevels, ModemVersion};
use crate::config::HostConfig;
use crate::error::{LinkError, Result};
use crate::protocol::{FrameBuffer, Mode};
use crate::session::{DataOutcome, Handshake, Inbound, LinkSession, SessionConfig};
use crate::status::{EventBus, LinkEvent, DEFAULT_EVENT_CAPACITY};
use crate::transport::{open_serial, Transport};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Default scheduler period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Decode-to-dispatch budget for one read.
pub const DISPATCH_BUDGET: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 4096;
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(500);

/// Builder for a [`Host`].
pub struct HostBuilder {
    bridges: BridgeSet,
    endpoints: HashMap<Mode, NetworkEndpoint>,
    session_config: SessionConfig,
    writer_config: WriterConfig,
    arbiter_config: ArbiterConfig,
    handshake: Handshake,
    event_capacity: usize,
    network_capacity: usize,
    tick_interval: Duration,
    /// First bridge registration error, reported by `start`.
    error: Option<LinkError>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            bridges: BridgeSet::new(),
            endpoints: HashMap::new(),
            session_config: SessionConfig::default(),
            writer_config: WriterConfig::default(),
            arbiter_config: ArbiterConfig::default(),
            handshake: Handshake::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            network_capacity: DEFAULT_NETWORK_QUEUE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            error: None,
        }
    }

    /// Builder populated from a configuration file: every enabled mode gets
    /// a [`ForwardingBridge`].
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        let mut builder = Self::new()
            .session_config(config.session_config()?)
            .writer_config(config.writer_config())
            .arbiter_config(config.arbiter_config()?)
            .handshake(config.handshake()?);

        for (mode, section) in config.mode_sections()? {
            if section.enable {
                builder = builder.forward_with_capacity(mode, section.network_queue);
            }
        }
        Ok(builder)
    }

    /// Enable `mode` with a stock forwarding bridge. Its network side is
    /// available from [`Host::take_endpoint`].
    pub fn forward(self, mode: Mode) -> Self {
        self.forward_with_capacity(mode, DEFAULT_NETWORK_QUEUE)
    }

    pub fn forward_with_capacity(mut self, mode: Mode, capacity: usize) -> Self {
        let (bridge, endpoint) = ForwardingBridge::new(mode, capacity);
        if self.add_bridge(Box::new(bridge)) {
            self.endpoints.insert(mode, endpoint);
        }
        self
    }

    /// Enable a protocol with a custom bridge.
    pub fn bridge(mut self, bridge: Box<dyn Bridge>) -> Self {
        self.add_bridge(bridge);
        self
    }

    fn add_bridge(&mut self, bridge: Box<dyn Bridge>) -> bool {
        match self.bridges.insert(bridge) {
            Ok(()) => true,
            Err(e) => {
                self.error.get_or_insert(e);
                false
            }
        }
    }

    pub fn handshake(mut self, handshake: Handshake) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn modem_config(mut self, config: ModemConfig) -> Self {
        self.handshake.config = config;
        self
    }

    pub fn levels(mut self, levels: ModemLevels) -> Self {
        self.handshake.levels = Some(levels);
        self
    }

    /// Push `params` during the handshake, after set-config.
    pub fn mode_params(mut self, params: ModeParams) -> Self {
        self.handshake.mode_params.push(params);
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    pub fn arbiter_config(mut self, config: ArbiterConfig) -> Self {
        self.arbiter_config = config;
        self
    }

    /// Command reply timeout.
    ///
    /// Default: 100ms
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.session_config.command_timeout = timeout;
        self
    }

    /// Silence on the command channel before a keep-alive status query.
    ///
    /// Default: 1000ms
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.session_config.keepalive_interval = interval;
        self
    }

    /// Minimum gap between frames on the wire.
    ///
    /// Default: 2ms
    pub fn inter_frame_gap(mut self, gap: Duration) -> Self {
        self.writer_config.inter_frame_gap = gap;
        self
    }

    /// Default: 100ms
    pub fn settle(mut self, settle: Duration) -> Self {
        self.arbiter_config.settle = settle;
        self
    }

    /// Default: 200ms
    pub fn drain_bound(mut self, bound: Duration) -> Self {
        self.arbiter_config.drain_bound = bound;
        self
    }

    pub fn fixed_mode(mut self, fixed: bool) -> Self {
        self.arbiter_config.fixed_mode = fixed;
        self
    }

    pub fn hang(mut self, mode: Mode, hang: HangConfig) -> Self {
        self.arbiter_config.hang.insert(mode, hang);
        self
    }

    pub fn cw_id(mut self, callsign: &str, interval: Duration) -> Self {
        self.arbiter_config.cw_id = Some(CwIdConfig {
            callsign: callsign.to_uppercase(),
            interval,
        });
        self
    }

    /// Capacity of the broadcast event bus.
    ///
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Scheduler period.
    ///
    /// Default: 10ms
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Open a serial port and start the host on it.
    pub async fn open_serial(self, port: &str, baud_rate: u32) -> Result<Host> {
        let stream = open_serial(port, baud_rate)?;
        self.start(stream).await
    }

    /// Start the host over `transport`. Returns once the handshake succeeded.
    pub async fn start<T: Transport>(self, transport: T) -> Result<Host> {
        Host::start(self, transport).await
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running modem link.
pub struct Host {
    arbiter: Arc<Arbiter>,
    endpoints: HashMap<Mode, NetworkEndpoint>,
    version: ModemVersion,
    reader_task: JoinHandle<()>,
    scheduler_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl Host {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    async fn start<T: Transport>(builder: HostBuilder, transport: T) -> Result<Self> {
        let HostBuilder {
            bridges,
            mut endpoints,
            session_config,
            writer_config,
            arbiter_config,
            mut handshake,
            event_capacity,
            network_capacity,
            tick_interval,
            error,
        } = builder;

        if let Some(e) = error {
            return Err(e);
        }
        if handshake.config.enabled_modes.is_empty() {
            handshake.config.enabled_modes = bridges.modes();
        }

        // 1. Transport and writer task
        let (reader, write_half) = tokio::io::split(transport);
        let (writer, writer_task) = spawn_writer_task(write_half, writer_config);

        let events = EventBus::new(event_capacity);
        let session = Arc::new(LinkSession::new(writer, events, session_config));
        let arbiter = Arc::new(Arbiter::new(
            session,
            bridges,
            arbiter_config,
            handshake,
        ));

        // 2. Read loop
        let reader_task = tokio::spawn(Self::run_reader(reader, arbiter.clone()));

        // 3. Handshake
        let version = match arbiter.initialize().await {
            Ok(version) => version,
            Err(e) => {
                tracing::error!(error = %e, "Modem handshake failed");
                reader_task.abort();
                return Err(e);
            }
        };
        tracing::info!(
            protocol = version.protocol,
            description = %version.description,
            "Modem link up"
        );

        // 4. Fixed mode
        if let Err(e) = arbiter.start().await {
            tracing::warn!(error = %e, "Fixed mode not entered");
        }

        // 5. Scheduler and network input
        let (network_tx, network_rx) = mpsc::channel(network_capacity.max(1));
        for endpoint in endpoints.values_mut() {
            endpoint.attach(network_tx.clone());
        }
        drop(network_tx);

        let scheduler_task = tokio::spawn(Self::run_scheduler(
            arbiter.clone(),
            network_rx,
            tick_interval,
        ));

        Ok(Host {
            arbiter,
            endpoints,
            version,
            reader_task,
            scheduler_task,
            writer_task,
        })
    }

    async fn run_reader<R: AsyncRead + Unpin>(reader: R, arbiter: Arc<Arbiter>) {
        let error = match Self::read_loop(reader, &arbiter).await {
            Ok(()) => LinkError::ConnectionClosed,
            Err(e) => {
                tracing::error!("Read loop error: {}", e);
                e
            }
        };
        arbiter.fail(&error);
    }

    /// Read bytes, decode frames and dispatch them. Returns at end of stream.
    async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, arbiter: &Arc<Arbiter>) -> Result<()> {
        let session = arbiter.session().clone();
        let mut frame_buffer = FrameBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut reported_errors = 0;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(LinkError::Io(e)),
            };
            let started = Instant::now();

            let frames = frame_buffer.push(&buf[..n]);

            let total = frame_buffer.framing_errors();
            if total != reported_errors {
                reported_errors = total;
                let discarded_bytes = frame_buffer.discarded_bytes();
                tracing::warn!(total, discarded_bytes, "Framing error, resynchronized");
                session.events().emit(LinkEvent::FramingError {
                    total,
                    discarded_bytes,
                });
            }

            let count = frames.len();
            for frame in frames {
                match session.on_frame(frame) {
                    Inbound::Data(channel, payload) => arbiter.on_rf_frame(channel, payload),
                    Inbound::Status(status) => arbiter.on_status(&status),
                    Inbound::Requeue(channel, payload) => {
                        arbiter.requeue_transmit(channel, payload)
                    }
                    Inbound::Handled => {}
                }
            }

            let elapsed = started.elapsed();
            if elapsed > DISPATCH_BUDGET {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    frames = count,
                    "Frame dispatch exceeded budget"
                );
            }
        }
    }

    /// Keep-alive, hang timers, network input and transmit.
    async fn run_scheduler(
        arbiter: Arc<Arbiter>,
        mut network: mpsc::Receiver<(Mode, Bytes)>,
        period: Duration,
    ) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !arbiter.is_failed() {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Instant::now();
                    arbiter.session().tick(now);
                    arbiter.tick(now);
                }
                Some((mode, payload)) = network.recv() => {
                    arbiter.on_network_frame(mode, payload);
                }
            }
            arbiter.pump_transmit().await;
        }

        tracing::debug!("Scheduler stopped");
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn session(&self) -> &Arc<LinkSession> {
        self.arbiter.session()
    }

    /// Version reported during the handshake.
    pub fn version(&self) -> &ModemVersion {
        &self.version
    }

    pub fn state(&self) -> ArbiterState {
        self.arbiter.state()
    }

    pub fn mode(&self) -> Mode {
        self.arbiter.mode()
    }

    pub fn stats(&self) -> ArbiterStats {
        self.arbiter.stats()
    }

    /// Subscribe to link events.
    pub fn events(&self) -> broadcast::Receiver<LinkEvent> {
        self.session().events().subscribe()
    }

    /// Network side of a forwarding bridge. Each endpoint can be taken once.
    pub fn take_endpoint(&mut self, mode: Mode) -> Option<NetworkEndpoint> {
        self.endpoints.remove(&mode)
    }

    /// Explicit mode request; `Mode::Idle` preempts a running switch.
    pub async fn request_mode(&self, mode: Mode) -> Result<()> {
        self.arbiter.request_mode(mode).await
    }

    /// Send a POCSAG frame, independent of the active mode.
    pub async fn send_paging(&self, payload: Bytes) -> Result<DataOutcome> {
        self.arbiter.send_paging(payload).await
    }

    /// Wait until the link fails or the modem disconnects.
    pub async fn wait_for_shutdown(&self) {
        let mut failed = self.arbiter.failed();
        let _ = failed.wait_for(|failed| *failed).await;
    }

    /// Return the modem to IDLE and stop every task.
    pub async fn shutdown(self) -> Result<()> {
        let result = if self.arbiter.is_failed() {
            Ok(())
        } else {
            self.arbiter.force_idle(SwitchTrigger::Shutdown).await
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Modem not returned to IDLE");
        }

        self.scheduler_task.abort();
        let writer = self.session().writer().clone();
        if !writer.flush(SHUTDOWN_FLUSH).await {
            tracing::warn!(pending = writer.pending_count(), "Writer not flushed");
        }
        self.reader_task.abort();

        self.session().events().emit(LinkEvent::Disconnected {
            reason: "shutdown".into(),
        });
        tracing::info!("Host stopped");

        drop(writer);
        drop(self.arbiter);
        drop(self.endpoints);
        match tokio::time::timeout(SHUTDOWN_FLUSH, self.writer_task).await {
            Ok(Ok(Err(e))) => tracing::debug!(error = %e, "Writer ended with error"),
            Ok(_) => {}
            Err(_) => tracing::debug!("Writer task still running"),
        }

        result
    }
}
