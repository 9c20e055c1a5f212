//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented and corrupt input:
//! - `Scanning`: hunting for the start marker and the 16-bit length
//! - `WaitingForBody`: length accepted, need `L` more bytes (type + payload)
//!
//! Bytes before a start marker are discarded. A zero or oversized length is
//! reported as corrupt; only the marker is dropped so scanning resumes on the
//! very next byte.
//!
//! # Example
//!
//! ```
//! use mmdvm_link::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Line noise, then a get-version reply split across two reads.
//! assert!(buffer.push(&[0x13, 0x37, 0xE0, 0x00]).is_empty());
//! let frames = buffer.push(&[0x02, 0x00, 0x01]);
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), &[0x01]);
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{DEFAULT_MAX_FRAME_LENGTH, PREFIX_SIZE, START_MARKER};
use super::Frame;

/// Outcome of a single decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was consumed.
    Frame(Frame),
    /// More bytes are needed; nothing was consumed past the resync point.
    Incomplete,
    /// The header at the front of the buffer was invalid and its marker dropped.
    Corrupt(CorruptReason),
}

/// Why a header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Length field of zero (the type byte is mandatory).
    ZeroLength,
    /// Length field above the configured maximum.
    Oversized(usize),
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Looking for a marker followed by a usable length.
    Scanning,
    /// Prefix consumed, waiting for `length` bytes of type + payload.
    WaitingForBody { length: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from port reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Largest length field accepted.
    max_length: usize,
    /// Headers rejected as corrupt.
    framing_errors: u64,
    /// Bytes thrown away while hunting for a marker.
    discarded_bytes: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Create a new frame buffer with a custom length limit.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            state: State::Scanning,
            max_length: max_length.max(1),
            framing_errors: 0,
            discarded_bytes: 0,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Corrupt headers are skipped and counted; partial data is kept for the
    /// next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.decode() {
                Decoded::Frame(frame) => frames.push(frame),
                Decoded::Corrupt(_) => continue,
                Decoded::Incomplete => break,
            }
        }
        frames
    }

    /// Run one decode step against the buffered bytes.
    ///
    /// Consumes at most one frame per call, so back-to-back frames need
    /// repeated calls.
    pub fn decode(&mut self) -> Decoded {
        match self.state {
            State::Scanning => {
                if !self.skip_to_marker() {
                    return Decoded::Incomplete;
                }
                if self.buffer.len() < PREFIX_SIZE {
                    return Decoded::Incomplete;
                }

                let length = u16::from_be_bytes([self.buffer[1], self.buffer[2]]) as usize;
                if length == 0 {
                    return self.reject(CorruptReason::ZeroLength);
                }
                if length > self.max_length {
                    return self.reject(CorruptReason::Oversized(length));
                }

                self.buffer.advance(PREFIX_SIZE);
                self.state = State::WaitingForBody { length };
                self.decode()
            }

            State::WaitingForBody { length } => {
                if self.buffer.len() < length {
                    return Decoded::Incomplete;
                }

                let mut body = self.buffer.split_to(length);
                let frame_type = body[0];
                body.advance(1);
                self.state = State::Scanning;

                Decoded::Frame(Frame::new(frame_type, body.freeze()))
            }
        }
    }

    /// Drop everything before the next start marker.
    ///
    /// Returns false if no marker is buffered.
    fn skip_to_marker(&mut self) -> bool {
        match self.buffer.iter().position(|&b| b == START_MARKER) {
            Some(0) => true,
            Some(offset) => {
                self.discarded_bytes += offset as u64;
                self.buffer.advance(offset);
                true
            }
            None => {
                self.discarded_bytes += self.buffer.len() as u64;
                self.buffer.clear();
                false
            }
        }
    }

    fn reject(&mut self, reason: CorruptReason) -> Decoded {
        self.buffer.advance(1);
        self.framing_errors += 1;
        self.discarded_bytes += 1;
        tracing::debug!("Corrupt frame header ({:?}), resynchronizing", reason);
        Decoded::Corrupt(reason)
    }

    /// Number of headers rejected as corrupt.
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    /// Number of bytes discarded during resynchronization.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Scanning;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::Scanning => "Scanning",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
