//! JSON-line rendering of link events on stdout.
//!
//! Uses an explicit `\n` and flushes after every line so a supervising
//! process can consume events as they happen. Logs go to stderr.

use std::io::Write;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::event::LinkEvent;
use crate::error::Result;

/// Write a line to stdout followed by a single `\n`, then flush.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Render an event as a single-line JSON object.
pub fn event_line(event: &LinkEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// Write an event to stdout as one JSON line.
pub fn write_event_line(event: &LinkEvent) -> Result<()> {
    let line = event_line(event)?;
    write_stdout_line(&line)?;
    Ok(())
}

/// Print every event received on `rx` until the bus closes.
pub fn spawn_event_printer(mut rx: broadcast::Receiver<LinkEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = write_event_line(&event) {
                        tracing::warn!(error = %e, "Failed to write status line");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Status printer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
