//! Error types for mmdvm-link.

use thiserror::Error;

use crate::protocol::{CommandType, DataChannel, Mode, NakCode};

/// Main error type for all link and arbitration operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on the serial port or transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON serialization error (status reporting only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error (malformed reply, oversized payload, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command is already awaiting its Ack/Nak.
    #[error("Command channel busy: {0} still pending")]
    CommandBusy(CommandType),

    /// No Ack/Nak arrived within the command window (after retry).
    #[error("Command {0} timed out")]
    CommandTimeout(CommandType),

    /// The modem explicitly rejected a command.
    #[error("Modem rejected {command}: {code}")]
    Nak { command: CommandType, code: NakCode },

    /// The modem's buffer for a data channel is full.
    #[error("Modem buffer full for {0}")]
    BufferFull(DataChannel),

    /// The serial transmit queue stayed full past its timeout.
    #[error("Transmit queue full")]
    QueueFull,

    /// A mode switch was aborted; the previous mode is still active.
    #[error("Mode switch to {target} failed: {reason}")]
    ModeSwitch { target: Mode, reason: String },

    /// Another switch is running and this request may not preempt it.
    #[error("Mode switch already in progress")]
    SwitchInProgress,

    /// The requested mode has no bridge configured.
    #[error("Protocol {0} is not enabled")]
    ProtocolDisabled(Mode),

    /// Two consecutive command timeouts; the link needs re-initialization.
    #[error("Modem link unresponsive")]
    LinkUnresponsive,

    /// Transport closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl LinkError {
    /// True only for the condition that leaves no safe state to return to.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::LinkUnresponsive | LinkError::ConnectionClosed)
    }
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
