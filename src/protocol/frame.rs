//! Frame struct with typed accessors.
//!
//! Represents one complete link frame: a type byte and its payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use mmdvm_link::protocol::{Frame, FrameKind, CommandType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(0x03, Bytes::from_static(&[0x00]));
//! assert_eq!(frame.kind(), FrameKind::Command(CommandType::SetMode));
//! assert_eq!(frame.encode().unwrap(), vec![0xE0, 0x00, 0x02, 0x03, 0x00]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::mode::DataChannel;
use super::wire_format::{
    frame_type, CommandType, NakCode, ABSOLUTE_MAX_PAYLOAD_SIZE, HEADER_SIZE, START_MARKER,
};
use crate::error::{LinkError, Result};

/// Classification of a frame's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A command, or the data-bearing reply to one.
    Command(CommandType),
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nak,
    /// Protocol traffic for a data channel.
    Data(DataChannel),
    /// Anything else (debug output, newer firmware types).
    Unknown(u8),
}

/// A complete link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte.
    pub frame_type: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from a type byte and payload.
    pub fn new(frame_type: u8, payload: Bytes) -> Self {
        Self {
            frame_type,
            payload,
        }
    }

    /// Create a frame from a type byte and raw bytes (copies data).
    pub fn from_parts(frame_type: u8, payload: &[u8]) -> Self {
        Self {
            frame_type,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Build a command frame.
    pub fn command(command: CommandType, payload: &[u8]) -> Self {
        Self::from_parts(command.as_u8(), payload)
    }

    /// Build a data frame.
    pub fn data(channel: DataChannel, payload: Bytes) -> Self {
        Self::new(channel.as_u8(), payload)
    }

    /// Build an Ack for the given type byte.
    pub fn ack(acked: u8) -> Self {
        Self::from_parts(frame_type::ACK, &[acked])
    }

    /// Build a Nak. Payload layout is `[error code, failed type]`.
    pub fn nak(code: NakCode, failed: u8) -> Self {
        Self::from_parts(frame_type::NAK, &[code.as_u8(), failed])
    }

    /// Classify the type byte.
    pub fn kind(&self) -> FrameKind {
        match self.frame_type {
            frame_type::ACK => FrameKind::Ack,
            frame_type::NAK => FrameKind::Nak,
            other => {
                if let Some(channel) = DataChannel::from_u8(other) {
                    FrameKind::Data(channel)
                } else if let Some(command) = CommandType::from_u8(other) {
                    FrameKind::Command(command)
                } else {
                    FrameKind::Unknown(other)
                }
            }
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Value of the wire length field (type byte + payload).
    #[inline]
    pub fn wire_length(&self) -> usize {
        1 + self.payload.len()
    }

    /// Check if this is an Ack.
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.frame_type == frame_type::ACK
    }

    /// Check if this is a Nak.
    #[inline]
    pub fn is_nak(&self) -> bool {
        self.frame_type == frame_type::NAK
    }

    /// Check if this carries protocol data.
    #[inline]
    pub fn is_data(&self) -> bool {
        frame_type::is_data(self.frame_type)
    }

    /// For an Ack, the type byte it acknowledges.
    pub fn acked_type(&self) -> Option<u8> {
        if self.is_ack() {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// For a Nak, the error code and the type byte that failed.
    pub fn nak_details(&self) -> Option<(NakCode, u8)> {
        if self.is_nak() && self.payload.len() >= 2 {
            Some((NakCode::from_u8(self.payload[0]), self.payload[1]))
        } else {
            None
        }
    }

    /// Encode this frame into a freshly allocated buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        build_frame(self.frame_type, &self.payload)
    }

    /// Encode this frame, appending to an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<()> {
        let length = wire_length(self.payload.len())?;
        buf.reserve(HEADER_SIZE + self.payload.len());
        buf.put_u8(START_MARKER);
        buf.put_u16(length);
        buf.put_u8(self.frame_type);
        buf.put_slice(&self.payload);
        Ok(())
    }
}

/// Length field for a payload of `len` bytes.
fn wire_length(len: usize) -> Result<u16> {
    if len > ABSOLUTE_MAX_PAYLOAD_SIZE {
        return Err(LinkError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            len, ABSOLUTE_MAX_PAYLOAD_SIZE
        )));
    }
    Ok((len + 1) as u16)
}

/// Build a complete frame as a single byte vector.
///
/// The length field is always computed from `payload`.
///
/// # Example
///
/// ```
/// use mmdvm_link::protocol::build_frame;
///
/// let bytes = build_frame(0x00, &[]).unwrap();
/// assert_eq!(bytes, vec![0xE0, 0x00, 0x01, 0x00]);
/// ```
pub fn build_frame(frame_type: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = wire_length(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(START_MARKER);
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(frame_type);
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(0x24, Bytes::from_static(b"hello"));

        assert_eq!(frame.frame_type, 0x24);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(frame.payload_len(), 5);
        assert_eq!(frame.wire_length(), 6);
        assert!(frame.is_data());
    }

    #[test]
    fn test_frame_kinds() {
        assert_eq!(
            Frame::command(CommandType::GetStatus, &[]).kind(),
            FrameKind::Command(CommandType::GetStatus)
        );
        assert_eq!(Frame::ack(0x03).kind(), FrameKind::Ack);
        assert_eq!(Frame::nak(NakCode::Busy, 0x22).kind(), FrameKind::Nak);
        assert_eq!(
            Frame::from_parts(0x23, &[1]).kind(),
            FrameKind::Data(DataChannel::Dmr2)
        );
        assert_eq!(Frame::from_parts(0xF1, b"debug").kind(), FrameKind::Unknown(0xF1));
    }

    #[test]
    fn test_ack_and_nak_accessors() {
        let ack = Frame::ack(0x02);
        assert_eq!(ack.acked_type(), Some(0x02));
        assert_eq!(ack.nak_details(), None);

        let nak = Frame::nak(NakCode::WrongMode, 0x03);
        assert_eq!(nak.nak_details(), Some((NakCode::WrongMode, 0x03)));
        assert_eq!(nak.acked_type(), None);

        let short_nak = Frame::from_parts(frame_type::NAK, &[0x04]);
        assert_eq!(short_nak.nak_details(), None);
    }

    #[test]
    fn test_build_frame_get_version() {
        let bytes = build_frame(0x00, &[]).unwrap();
        assert_eq!(bytes, vec![0xE0, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_build_frame_set_mode_idle() {
        let bytes = Frame::command(CommandType::SetMode, &[0x00]).encode().unwrap();
        assert_eq!(bytes, vec![0xE0, 0x00, 0x02, 0x03, 0x00]);
    }

    #[test]
    fn test_length_is_big_endian() {
        let payload = vec![0x55; 300];
        let bytes = build_frame(0x28, &payload).unwrap();
        // 301 = 0x012D
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0x2D);
        assert_eq!(bytes.len(), HEADER_SIZE + 300);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; ABSOLUTE_MAX_PAYLOAD_SIZE + 1];
        let result = build_frame(0x20, &payload);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::new();
        Frame::ack(0x02).encode_into(&mut buf).unwrap();
        Frame::command(CommandType::GetStatus, &[]).encode_into(&mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0xE0, 0x00, 0x02, 0x70, 0x02, 0xE0, 0x00, 0x01, 0x01]
        );
    }

    #[test]
    fn test_build_frame_roundtrip() {
        use super::super::FrameBuffer;

        let payload = b"0123456789";
        let bytes = build_frame(0x27, payload).unwrap();

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), FrameKind::Data(DataChannel::M17));
        assert_eq!(frames[0].payload(), payload);
    }
}
