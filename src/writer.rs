//! Dedicated serial writer task.
//!
//! Every frame sent to the modem goes through one task that owns the write
//! half of the port. Callers enqueue frames on an mpsc channel; the task
//! writes them one at a time and waits out the inter-frame gap the firmware
//! needs between frames.
//!
//! ```text
//! Session ──┐
//! Arbiter ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Serial port
//! Paging  ──┘                                   (gap ≥ 2ms)
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::protocol::{Frame, HEADER_SIZE, START_MARKER};

/// Default minimum spacing between two frames on the wire.
pub const DEFAULT_INTER_FRAME_GAP: Duration = Duration::from_millis(2);

/// Default maximum queued frames before senders wait.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 256;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default time a sender waits for the queue to drain below the limit.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// A frame ready to be written to the port.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Marker, length and type byte.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for most commands).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Prepare a frame for the wire.
    ///
    /// Fails if the payload does not fit the 16-bit length field.
    pub fn new(frame: &Frame) -> Result<Self> {
        let length = u16::try_from(frame.wire_length()).map_err(|_| {
            LinkError::Protocol(format!(
                "Payload size {} does not fit a frame",
                frame.payload_len()
            ))
        })?;
        let [hi, lo] = length.to_be_bytes();

        Ok(Self {
            header: [START_MARKER, hi, lo, frame.frame_type],
            payload: frame.payload.clone(),
        })
    }

    /// Type byte of the frame.
    #[inline]
    pub fn frame_type(&self) -> u8 {
        self.header[HEADER_SIZE - 1]
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Minimum time between the end of one frame and the start of the next.
    pub inter_frame_gap: Duration,
    /// Maximum queued frames before `send` waits.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long `send` waits for the queue to drain.
    pub queue_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            inter_frame_gap: DEFAULT_INTER_FRAME_GAP,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            queue_timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// Cheap to clone; all clones feed the same queue.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames queued or being written.
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Queue a frame, waiting while the queue is at its limit.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let outbound = OutboundFrame::new(frame)?;

        if self.pending.load(Ordering::Acquire) >= self.max_pending
            && !self.wait_below(self.max_pending, self.timeout).await
        {
            return Err(LinkError::QueueFull);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(outbound).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            LinkError::ConnectionClosed
        })
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Err(QueueFull)` immediately if at capacity.
    pub fn try_send(&self, frame: &Frame) -> Result<()> {
        let outbound = OutboundFrame::new(frame)?;

        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(LinkError::QueueFull);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(outbound).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => LinkError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => LinkError::ConnectionClosed,
            }
        })
    }

    /// Wait until every queued frame has been written, up to `bound`.
    ///
    /// Returns `false` if frames were still queued when the bound elapsed.
    pub async fn flush(&self, bound: Duration) -> bool {
        self.wait_below(1, bound).await
    }

    async fn wait_below(&self, limit: usize, bound: Duration) -> bool {
        let deadline = Instant::now() + bound;
        let check_interval = Duration::from_millis(1);

        loop {
            if self.pending.load(Ordering::Acquire) < limit {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing frames.
///
/// The join handle resolves when every handle is dropped or a write fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.queue_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending, config.inter_frame_gap));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    gap: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut last_write: Option<Instant> = None;

    while let Some(frame) = rx.recv().await {
        if let Some(at) = last_write {
            tokio::time::sleep_until(at + gap).await;
        }

        let result = write_frame(&mut writer, &frame).await;
        pending.fetch_sub(1, Ordering::Release);
        last_write = Some(Instant::now());

        if let Err(e) = result {
            tracing::error!(error = %e, frame_type = frame.frame_type(), "Serial write failed");
            return Err(e);
        }
        tracing::trace!(
            frame_type = format_args!("0x{:02X}", frame.frame_type()),
            size = frame.size(),
            "Frame written"
        );
    }

    Ok(())
}

/// Write one frame with a vectored write, continuing after partial writes.
async fn write_frame<W>(writer: &mut W, frame: &OutboundFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size = frame.size();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(frame, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering whatever remains of `frame` after `skip_bytes`.
fn remaining_slices(frame: &OutboundFrame, skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(2);

    if skip_bytes < HEADER_SIZE {
        slices.push(IoSlice::new(&frame.header[skip_bytes..]));
    }

    let payload_skip = skip_bytes.saturating_sub(HEADER_SIZE);
    if payload_skip < frame.payload.len() {
        slices.push(IoSlice::new(&frame.payload[payload_skip..]));
    }

    slices
}
