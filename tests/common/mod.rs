//! Scripted in-memory modem for integration tests.
//!
//! Answers the command set the way MMDVM firmware does. Individual replies
//! can be swallowed, set-mode can be refused per target, and any frame type
//! can be made to answer `NAK(busy)`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use mmdvm_link::codec::ModemStatus;
use mmdvm_link::protocol::{DataChannel, Frame, FrameBuffer, Mode, NakCode};
use mmdvm_link::status::LinkEvent;
use mmdvm_link::{Host, HostBuilder};

/// Free space reported for every channel.
pub const REPORTED_SPACE: u16 = 4800;

struct Script {
    mode: u8,
    /// cap1 and cap2 of the version reply.
    capabilities: (u8, u8),
    lockout: bool,
    /// Frame type → replies still to swallow.
    silence: HashMap<u8, usize>,
    set_mode_nak: HashMap<u8, NakCode>,
    /// Frame type → `NAK(busy)` replies still to give.
    busy: HashMap<u8, usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            mode: 0,
            capabilities: (0x7F, 0x03),
            lockout: false,
            silence: HashMap::new(),
            set_mode_nak: HashMap::new(),
            busy: HashMap::new(),
        }
    }
}

pub struct MockModem {
    script: Arc<Mutex<Script>>,
    received: Arc<Mutex<Vec<Frame>>>,
    inject: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// Host-side stream and the modem answering on the other end.
pub fn mock_modem() -> (DuplexStream, MockModem) {
    mmdvm_link::logging::init_for_tests();
    let (host, modem) = tokio::io::duplex(1 << 16);
    let script = Arc::new(Mutex::new(Script::default()));
    let received = Arc::new(Mutex::new(Vec::new()));
    let (inject, inject_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(run(modem, script.clone(), received.clone(), inject_rx));

    (
        host,
        MockModem {
            script,
            received,
            inject,
            task,
        },
    )
}

/// Start a host against a fresh mock modem.
pub async fn start_host(builder: HostBuilder) -> (Host, MockModem) {
    let (transport, modem) = mock_modem();
    let host = builder.start(transport).await.expect("host start");
    (host, modem)
}

async fn run(
    stream: DuplexStream,
    script: Arc<Mutex<Script>>,
    received: Arc<Mutex<Vec<Frame>>>,
    mut inject: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buffer = FrameBuffer::new();
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                for frame in buffer.push(&buf[..n]) {
                    received.lock().push(frame.clone());
                    if let Some(reply) = respond(&script, &frame) {
                        let bytes = reply.encode().unwrap();
                        if writer.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                }
            }
            bytes = inject.recv() => match bytes {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

fn respond(script: &Mutex<Script>, frame: &Frame) -> Option<Frame> {
    let mut script = script.lock();
    let kind = frame.frame_type;

    if let Some(remaining) = script.silence.get_mut(&kind) {
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
    }

    if let Some(remaining) = script.busy.get_mut(&kind) {
        if *remaining > 0 {
            *remaining = remaining.saturating_sub(1);
            return Some(Frame::nak(NakCode::Busy, kind));
        }
    }

    match kind {
        0x00 => {
            let (cap1, cap2) = script.capabilities;
            let mut payload = vec![0x02, 0x01, cap1, cap2];
            payload.extend_from_slice(b"MMDVM mock 20240101");
            Some(Frame::from_parts(0x00, &payload))
        }
        0x01 => {
            let status = ModemStatus {
                mode_byte: script.mode,
                tx: false,
                carrier_detect: false,
                lockout: script.lockout,
                error: false,
                free_space: DataChannel::ALL
                    .iter()
                    .map(|&channel| (channel, REPORTED_SPACE))
                    .collect(),
            };
            Some(Frame::new(0x01, status.encode()))
        }
        0x03 => {
            let target = frame.payload.first().copied().unwrap_or(0);
            match script.set_mode_nak.get(&target) {
                Some(code) => Some(Frame::nak(*code, 0x03)),
                None => {
                    script.mode = target;
                    Some(Frame::ack(0x03))
                }
            }
        }
        0x02 | 0x04..=0x0C | 0x0E => Some(Frame::ack(kind)),
        _ => None,
    }
}

impl MockModem {
    /// Every frame the host sent, in order.
    pub fn frames(&self) -> Vec<Frame> {
        self.received.lock().clone()
    }

    pub fn frames_of(&self, frame_type: u8) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.frame_type == frame_type)
            .collect()
    }

    /// Targets of every set-mode received.
    pub fn set_mode_requests(&self) -> Vec<u8> {
        self.frames_of(0x03)
            .iter()
            .filter_map(|f| f.payload.first().copied())
            .collect()
    }

    pub fn mode(&self) -> u8 {
        self.script.lock().mode
    }

    /// Swallow the next `count` replies to `frame_type`.
    pub fn silence(&self, frame_type: u8, count: usize) {
        self.script.lock().silence.insert(frame_type, count);
    }

    pub fn refuse_mode(&self, mode: Mode, code: NakCode) {
        self.script.lock().set_mode_nak.insert(mode.as_u8(), code);
    }

    pub fn busy(&self, channel: DataChannel) {
        self.script.lock().busy.insert(channel.as_u8(), usize::MAX);
    }

    /// Answer the next `count` frames of `frame_type` with `NAK(busy)`.
    pub fn busy_replies(&self, frame_type: u8, count: usize) {
        self.script.lock().busy.insert(frame_type, count);
    }

    /// Capability bytes reported by get-version.
    pub fn set_capabilities(&self, cap1: u8, cap2: u8) {
        self.script.lock().capabilities = (cap1, cap2);
    }

    pub fn set_lockout(&self, lockout: bool) {
        self.script.lock().lockout = lockout;
    }

    pub fn send_rf(&self, channel: DataChannel, payload: &[u8]) {
        self.send_rf_batch(&[(channel, payload)]);
    }

    /// Several frames in a single write, so the host reads them together.
    pub fn send_rf_batch(&self, frames: &[(DataChannel, &[u8])]) {
        let mut bytes = Vec::new();
        for (channel, payload) in frames {
            let frame = Frame::data(*channel, Bytes::copy_from_slice(payload));
            bytes.extend(frame.encode().unwrap());
        }
        self.send_raw(bytes);
    }

    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.inject.send(bytes).unwrap();
    }

    /// Drop the link as if the cable was pulled.
    pub fn disconnect(self) {
        self.task.abort();
    }
}

/// Poll `condition` until it holds, for up to five (virtual) seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

/// Everything published so far.
pub fn drain_events(rx: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
