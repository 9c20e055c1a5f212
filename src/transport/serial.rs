//! Serial port transport.
//!
//! MMDVM modems talk 8N1 without flow control, usually at 115200 baud.

use std::time::Duration;

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::Result;

/// Default modem baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Open `port` as an async byte stream.
pub fn open_serial(port: &str, baud_rate: u32) -> Result<SerialStream> {
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(OPEN_TIMEOUT)
        .open_native_async()
        .map_err(|e| {
            tracing::error!(%port, error = %e, "Failed to open serial port");
            e
        })?;

    tracing::info!(%port, baud_rate, "Serial port opened");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;

    #[tokio::test]
    async fn test_missing_port_is_serial_error() {
        let result = open_serial("/dev/mmdvm-link-does-not-exist", DEFAULT_BAUD_RATE);
        assert!(matches!(result, Err(LinkError::Serial(_))));
    }
}
