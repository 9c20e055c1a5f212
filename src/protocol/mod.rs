//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the host-modem link framing:
//! - Type codes, NAK reasons and timing-independent constants
//! - Frame buffer with resynchronization for noisy serial input
//! - Frame struct with typed accessors
//! - Modes and data channels

mod frame;
mod frame_buffer;
mod mode;
mod wire_format;

pub use frame::{build_frame, Frame, FrameKind};
pub use frame_buffer::{CorruptReason, Decoded, FrameBuffer};
pub use mode::{DataChannel, Direction, Mode};
pub use wire_format::{
    frame_type, CommandType, NakCode, ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_FRAME_LENGTH,
    HEADER_SIZE, PREFIX_SIZE, START_MARKER,
};
