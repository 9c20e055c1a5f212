//! Stock bridge that forwards opaque payloads to and from a network task.
//!
//! RF frames go out on a bounded channel to whoever holds the
//! [`NetworkEndpoint`]; network frames come back through the arbiter and wait
//! in a bounded transmit queue until the modem has room. DMR payloads carry
//! the slot number (1 or 2) as their first byte on the network side.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::Bridge;
use crate::error::{LinkError, Result};
use crate::protocol::{DataChannel, Direction, Mode};

/// Default bound on frames queued in each direction.
pub const DEFAULT_NETWORK_QUEUE: usize = 64;

/// Queued network frames older than this are discarded.
pub const DEFAULT_MAX_FRAME_AGE: Duration = Duration::from_secs(1);

/// Network side of a [`ForwardingBridge`].
#[derive(Debug)]
pub struct NetworkEndpoint {
    mode: Mode,
    from_radio: mpsc::Receiver<Bytes>,
    to_radio: Option<mpsc::Sender<(Mode, Bytes)>>,
}

impl NetworkEndpoint {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Next frame received off the air. `None` once the host stops.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_radio.recv().await
    }

    /// Hand a frame to the host for transmission.
    ///
    /// Network traffic for an inactive mode may trigger a mode switch.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let tx = self.to_radio.as_ref().ok_or(LinkError::ConnectionClosed)?;
        tx.send((self.mode, payload))
            .await
            .map_err(|_| LinkError::ConnectionClosed)
    }

    /// Connect the endpoint to the host's network input.
    pub(crate) fn attach(&mut self, to_radio: mpsc::Sender<(Mode, Bytes)>) {
        self.to_radio = Some(to_radio);
    }
}

/// Counters kept by a [`ForwardingBridge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingStats {
    pub rf_forwarded: u64,
    pub rf_dropped: u64,
    pub net_queued: u64,
    pub net_refused: u64,
    pub net_expired: u64,
}

/// Pass-through bridge for any protocol.
#[derive(Debug)]
pub struct ForwardingBridge {
    mode: Mode,
    to_network: mpsc::Sender<Bytes>,
    tx_queue: VecDeque<(DataChannel, Bytes, Instant)>,
    max_queue: usize,
    max_age: Duration,
    stats: ForwardingStats,
}

impl ForwardingBridge {
    /// Create a bridge and its network endpoint. `capacity` bounds both the
    /// outgoing channel and the transmit queue.
    pub fn new(mode: Mode, capacity: usize) -> (Self, NetworkEndpoint) {
        let capacity = capacity.max(1);
        let (to_network, from_radio) = mpsc::channel(capacity);

        let bridge = Self {
            mode,
            to_network,
            tx_queue: VecDeque::with_capacity(capacity),
            max_queue: capacity,
            max_age: DEFAULT_MAX_FRAME_AGE,
            stats: ForwardingStats::default(),
        };
        let endpoint = NetworkEndpoint {
            mode,
            from_radio,
            to_radio: None,
        };

        (bridge, endpoint)
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn stats(&self) -> ForwardingStats {
        self.stats
    }

    /// Network-side encoding of a received frame.
    fn encode_for_network(channel: DataChannel, payload: Bytes) -> Bytes {
        let slot = match channel {
            DataChannel::Dmr1 => 1,
            DataChannel::Dmr2 => 2,
            _ => return payload,
        };
        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(slot);
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Channel and radio payload of a network frame.
    fn decode_from_network(&self, mut payload: Bytes) -> Option<(DataChannel, Bytes)> {
        match self.mode {
            Mode::Dmr => {
                let channel = match *payload.first()? {
                    1 => DataChannel::Dmr1,
                    2 => DataChannel::Dmr2,
                    _ => return None,
                };
                let _ = payload.split_to(1);
                Some((channel, payload))
            }
            mode => mode.channels().first().map(|&ch| (ch, payload)),
        }
    }
}

impl Bridge for ForwardingBridge {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn on_rf_frame(&mut self, channel: DataChannel, payload: Bytes) {
        let payload = Self::encode_for_network(channel, payload);
        match self.to_network.try_send(payload) {
            Ok(()) => self.stats.rf_forwarded += 1,
            Err(e) => {
                self.stats.rf_dropped += 1;
                tracing::debug!(mode = %self.mode, error = %e, "RF frame not forwarded");
            }
        }
    }

    fn on_network_frame(&mut self, payload: Bytes) -> bool {
        if self.tx_queue.len() >= self.max_queue {
            self.stats.net_refused += 1;
            return false;
        }

        match self.decode_from_network(payload) {
            Some((channel, payload)) => {
                self.tx_queue.push_back((channel, payload, Instant::now()));
                self.stats.net_queued += 1;
                true
            }
            None => {
                self.stats.net_refused += 1;
                tracing::warn!(mode = %self.mode, "Malformed network frame");
                false
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        while let Some((_, _, queued_at)) = self.tx_queue.front() {
            if now.duration_since(*queued_at) <= self.max_age {
                break;
            }
            self.tx_queue.pop_front();
            self.stats.net_expired += 1;
        }
    }

    fn has_buffer_space(&self, direction: Direction) -> bool {
        match direction {
            Direction::Rx => self.to_network.capacity() > 0,
            Direction::Tx => self.tx_queue.len() < self.max_queue,
        }
    }

    fn reset(&mut self) {
        self.tx_queue.clear();
    }

    fn peek_transmit(&self) -> Option<(DataChannel, usize)> {
        self.tx_queue
            .front()
            .map(|(channel, payload, _)| (*channel, payload.len()))
    }

    fn poll_transmit(&mut self) -> Option<(DataChannel, Bytes)> {
        self.tx_queue
            .pop_front()
            .map(|(channel, payload, _)| (channel, payload))
    }

    fn requeue_transmit(&mut self, channel: DataChannel, payload: Bytes) {
        self.tx_queue.push_front((channel, payload, Instant::now()));
    }

    fn pending_transmit(&self) -> usize {
        self.tx_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rf_frames_reach_network() {
        let (mut bridge, mut endpoint) = ForwardingBridge::new(Mode::Ysf, 4);

        bridge.on_rf_frame(DataChannel::Ysf, Bytes::from_static(b"ysf"));

        assert_eq!(endpoint.recv().await.unwrap(), Bytes::from_static(b"ysf"));
        assert_eq!(bridge.stats().rf_forwarded, 1);
    }

    #[tokio::test]
    async fn test_dmr_slot_prefix() {
        let (mut bridge, mut endpoint) = ForwardingBridge::new(Mode::Dmr, 4);

        bridge.on_rf_frame(DataChannel::Dmr2, Bytes::from_static(&[0xAA, 0xBB]));
        assert_eq!(&endpoint.recv().await.unwrap()[..], &[2, 0xAA, 0xBB]);

        assert!(bridge.on_network_frame(Bytes::from_static(&[1, 0xCC])));
        assert_eq!(bridge.peek_transmit(), Some((DataChannel::Dmr1, 1)));
        assert_eq!(
            bridge.poll_transmit(),
            Some((DataChannel::Dmr1, Bytes::from_static(&[0xCC])))
        );
    }

    #[test]
    fn test_dmr_bad_slot_refused() {
        let (mut bridge, _endpoint) = ForwardingBridge::new(Mode::Dmr, 4);
        assert!(!bridge.on_network_frame(Bytes::from_static(&[3, 0x00])));
        assert!(!bridge.on_network_frame(Bytes::new()));
        assert_eq!(bridge.pending_transmit(), 0);
        assert_eq!(bridge.stats().net_refused, 2);
    }

    #[test]
    fn test_rx_space_follows_network_channel() {
        let (mut bridge, _endpoint) = ForwardingBridge::new(Mode::P25, 1);
        assert!(bridge.has_buffer_space(Direction::Rx));

        bridge.on_rf_frame(DataChannel::P25, Bytes::from_static(b"1"));
        assert!(!bridge.has_buffer_space(Direction::Rx));

        bridge.on_rf_frame(DataChannel::P25, Bytes::from_static(b"2"));
        assert_eq!(bridge.stats().rf_dropped, 1);
    }

    #[test]
    fn test_tx_queue_bounded() {
        let (mut bridge, _endpoint) = ForwardingBridge::new(Mode::Nxdn, 2);

        assert!(bridge.on_network_frame(Bytes::from_static(b"a")));
        assert!(bridge.on_network_frame(Bytes::from_static(b"b")));
        assert!(!bridge.has_buffer_space(Direction::Tx));
        assert!(!bridge.on_network_frame(Bytes::from_static(b"c")));
        assert_eq!(bridge.pending_transmit(), 2);
    }

    #[test]
    fn test_reset_clears_queue() {
        let (mut bridge, _endpoint) = ForwardingBridge::new(Mode::M17, 4);
        bridge.on_network_frame(Bytes::from_static(b"a"));
        bridge.reset();
        assert_eq!(bridge.pending_transmit(), 0);
        assert_eq!(bridge.peek_transmit(), None);
    }

    #[test]
    fn test_requeued_frame_goes_out_first() {
        let (mut bridge, _endpoint) = ForwardingBridge::new(Mode::Dmr, 4);
        bridge.on_network_frame(Bytes::from_static(&[1, 0x01]));
        bridge.on_network_frame(Bytes::from_static(&[2, 0x02]));

        let (channel, payload) = bridge.poll_transmit().unwrap();
        bridge.requeue_transmit(channel, payload);

        assert_eq!(bridge.pending_transmit(), 2);
        assert_eq!(
            bridge.poll_transmit(),
            Some((DataChannel::Dmr1, Bytes::from_static(&[0x01])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_expires_stale_frames() {
        let (bridge, _endpoint) = ForwardingBridge::new(Mode::Fm, 4);
        let mut bridge = bridge.with_max_age(Duration::from_millis(100));

        bridge.on_network_frame(Bytes::from_static(b"old"));
        tokio::time::advance(Duration::from_millis(80)).await;
        bridge.on_network_frame(Bytes::from_static(b"new"));
        tokio::time::advance(Duration::from_millis(40)).await;

        bridge.tick(Instant::now());

        assert_eq!(bridge.pending_transmit(), 1);
        assert_eq!(
            bridge.poll_transmit(),
            Some((DataChannel::Fm, Bytes::from_static(b"new")))
        );
        assert_eq!(bridge.stats().net_expired, 1);
    }

    #[tokio::test]
    async fn test_endpoint_send_requires_attach() {
        let (_bridge, mut endpoint) = ForwardingBridge::new(Mode::Ysf, 4);
        assert!(matches!(
            endpoint.send(Bytes::from_static(b"x")).await,
            Err(LinkError::ConnectionClosed)
        ));

        let (tx, mut rx) = mpsc::channel(4);
        endpoint.attach(tx);
        endpoint.send(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(rx.recv().await, Some((Mode::Ysf, Bytes::from_static(b"x"))));
    }
}
