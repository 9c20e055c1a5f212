//! Transport module - the byte stream to the modem.
//!
//! The link runs over anything that is `AsyncRead + AsyncWrite`. Production
//! hosts open a serial port; tests use an in-memory duplex.

mod serial;

pub use serial::{open_serial, DEFAULT_BAUD_RATE};

use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream a modem link can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
