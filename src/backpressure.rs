//! Modem buffer accounting and busy backoff.
//!
//! The modem keeps one transmit buffer per data channel. The host tracks an
//! estimate of the free space in each so it can hold frames back instead of
//! provoking `NAK(busy)`:
//!
//! - a status reply sets the estimate to what the modem reports,
//! - every accepted data frame subtracts its payload length,
//! - a `NAK(busy)` closes the channel for an exponentially growing delay
//!   (25ms doubling up to a cap) until the next status report.
//!
//! The accounting is shared between the session and the arbiter and uses a
//! short-lived lock that is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{LinkError, Result};
use crate::protocol::DataChannel;

/// Default first retry delay after a busy NAK.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(25);

/// Default upper bound on the retry delay.
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_millis(800);

/// Exponential backoff: `base * 2^n`, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts.min(31)).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Consecutive failures recorded so far.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE, DEFAULT_RETRY_CAP)
    }
}

/// Accounting state for one channel.
#[derive(Debug, Clone)]
struct ChannelBudget {
    capacity: usize,
    space: usize,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl ChannelBudget {
    fn new(capacity: usize, base: Duration, cap: Duration) -> Self {
        Self {
            capacity,
            space: capacity,
            backoff: Backoff::new(base, cap),
            retry_at: None,
        }
    }

    fn in_backoff(&self, now: Instant) -> bool {
        matches!(self.retry_at, Some(at) if now < at)
    }
}

/// Per-channel free-space estimate of the modem's transmit buffers.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct BufferAccounting {
    channels: Arc<Mutex<HashMap<DataChannel, ChannelBudget>>>,
}

impl BufferAccounting {
    /// Create accounting with the default capacity of every channel.
    pub fn new(retry_base: Duration, retry_cap: Duration) -> Self {
        Self::with_capacities(&HashMap::new(), retry_base, retry_cap)
    }

    /// Create accounting, overriding the capacity of some channels.
    pub fn with_capacities(
        overrides: &HashMap<DataChannel, usize>,
        retry_base: Duration,
        retry_cap: Duration,
    ) -> Self {
        let channels = DataChannel::ALL
            .iter()
            .map(|&ch| {
                let capacity = overrides
                    .get(&ch)
                    .copied()
                    .unwrap_or_else(|| ch.default_capacity());
                (ch, ChannelBudget::new(capacity, retry_base, retry_cap))
            })
            .collect();

        Self {
            channels: Arc::new(Mutex::new(channels)),
        }
    }

    /// Check whether a frame of `len` bytes may be sent now.
    pub fn can_send(&self, channel: DataChannel, len: usize, now: Instant) -> bool {
        let channels = self.channels.lock();
        channels
            .get(&channel)
            .map(|b| !b.in_backoff(now) && b.space >= len)
            .unwrap_or(false)
    }

    /// Try to reserve space for a frame without blocking.
    ///
    /// Returns `Err(BufferFull)` while backing off or short of space.
    pub fn try_reserve(&self, channel: DataChannel, len: usize, now: Instant) -> Result<()> {
        let mut channels = self.channels.lock();
        let budget = channels
            .get_mut(&channel)
            .ok_or(LinkError::BufferFull(channel))?;

        if budget.in_backoff(now) || budget.space < len {
            return Err(LinkError::BufferFull(channel));
        }

        budget.space -= len;
        Ok(())
    }

    /// Give back space reserved for a frame that never reached the modem.
    pub fn release(&self, channel: DataChannel, len: usize) {
        let mut channels = self.channels.lock();
        if let Some(budget) = channels.get_mut(&channel) {
            budget.space = (budget.space + len).min(budget.capacity);
        }
    }

    /// Record a `NAK(busy)` for a channel and return the delay before retrying.
    ///
    /// The channel is closed until the delay passes; each further busy NAK
    /// before a status report doubles it.
    pub fn on_busy(&self, channel: DataChannel, now: Instant) -> Duration {
        let mut channels = self.channels.lock();
        match channels.get_mut(&channel) {
            Some(budget) => {
                let delay = budget.backoff.next_delay();
                budget.retry_at = Some(now + delay);
                delay
            }
            None => Duration::ZERO,
        }
    }

    /// Apply free space reported by a status reply.
    ///
    /// Any reported space ends the channel's backoff.
    pub fn update_space(&self, channel: DataChannel, free: usize) {
        let mut channels = self.channels.lock();
        if let Some(budget) = channels.get_mut(&channel) {
            budget.space = free.min(budget.capacity);
            if free > 0 {
                budget.backoff.reset();
                budget.retry_at = None;
            }
        }
    }

    /// Restore every channel to full capacity and drop all backoff state.
    ///
    /// Used after a mode change, when the modem has flushed its buffers.
    pub fn clear(&self) {
        let mut channels = self.channels.lock();
        for budget in channels.values_mut() {
            budget.space = budget.capacity;
            budget.backoff.reset();
            budget.retry_at = None;
        }
    }

    /// Current free-space estimate.
    pub fn space(&self, channel: DataChannel) -> usize {
        self.channels
            .lock()
            .get(&channel)
            .map(|b| b.space)
            .unwrap_or(0)
    }

    /// Configured capacity.
    pub fn capacity(&self, channel: DataChannel) -> usize {
        self.channels
            .lock()
            .get(&channel)
            .map(|b| b.capacity)
            .unwrap_or(0)
    }

    /// Consecutive busy NAKs since the last reported space.
    pub fn busy_count(&self, channel: DataChannel) -> u32 {
        self.channels
            .lock()
            .get(&channel)
            .map(|b| b.backoff.attempts())
            .unwrap_or(0)
    }

    /// When the channel may be retried, if it is backing off.
    pub fn retry_at(&self, channel: DataChannel) -> Option<Instant> {
        self.channels.lock().get(&channel).and_then(|b| b.retry_at)
    }
}

impl Default for BufferAccounting {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE, DEFAULT_RETRY_CAP)
    }
}
