//! Bridge module - the per-protocol side of mode arbitration.
//!
//! Provides:
//! - [`Bridge`] - the contract every protocol personality implements
//! - [`BridgeSet`] - the fixed Mode → Bridge binding built at startup
//! - [`ForwardingBridge`] - stock bridge exchanging payloads with a network task
//!
//! The arbiter only calls into the bridge of the active mode, and always from
//! under its own state lock, so a bridge is never entered concurrently with
//! its own [`Bridge::reset`].
//!
//! # Example
//!
//! ```
//! use mmdvm_link::bridge::{BridgeSet, ForwardingBridge};
//! use mmdvm_link::protocol::Mode;
//!
//! let (bridge, _network) = ForwardingBridge::new(Mode::Ysf, 64);
//! let mut bridges = BridgeSet::new();
//! bridges.insert(Box::new(bridge)).unwrap();
//! assert!(bridges.contains(Mode::Ysf));
//! ```

mod forwarding;
mod registry;

pub use forwarding::{
    ForwardingBridge, ForwardingStats, NetworkEndpoint, DEFAULT_MAX_FRAME_AGE,
    DEFAULT_NETWORK_QUEUE,
};
pub use registry::BridgeSet;

use bytes::Bytes;
use tokio::time::Instant;

use crate::protocol::{DataChannel, Direction, Mode};

/// One protocol personality.
pub trait Bridge: Send + 'static {
    /// The mode this bridge serves.
    fn mode(&self) -> Mode;

    /// A frame received off the air on one of this mode's channels.
    fn on_rf_frame(&mut self, channel: DataChannel, payload: Bytes);

    /// A frame from the network to be transmitted. Returns `false` if it was
    /// refused.
    fn on_network_frame(&mut self, payload: Bytes) -> bool;

    /// Periodic housekeeping.
    fn tick(&mut self, now: Instant);

    /// `Rx`: can accept another RF frame. `Tx`: can accept another network
    /// frame for transmission.
    fn has_buffer_space(&self, direction: Direction) -> bool;

    /// Drop all call state and queued traffic.
    fn reset(&mut self);

    /// Channel and length of the next frame waiting for the modem.
    fn peek_transmit(&self) -> Option<(DataChannel, usize)>;

    /// Take the next frame waiting for the modem.
    fn poll_transmit(&mut self) -> Option<(DataChannel, Bytes)>;

    /// Put back a frame the modem refused as busy. It goes out next.
    fn requeue_transmit(&mut self, channel: DataChannel, payload: Bytes);

    /// Frames waiting for the modem.
    fn pending_transmit(&self) -> usize;
}
