//! Status reporting - link events and their JSON-line rendering.
//!
//! Every condition the link engine surfaces (handshake, mode changes,
//! timeouts, rejected commands, data loss) is published as a [`LinkEvent`] on
//! a broadcast channel. Subscribers decide what to do with them; the binary
//! prints each one as a JSON object on its own stdout line.
//!
//! - **stdout**: events, one JSON object per line
//! - **stderr**: tracing output
//!
//! # Example
//!
//! ```
//! use mmdvm_link::status::{event_line, LinkEvent};
//! use mmdvm_link::protocol::CommandType;
//!
//! let line = event_line(&LinkEvent::CommandTimeout { command: CommandType::SetMode }).unwrap();
//! assert_eq!(line, r#"{"event":"command_timeout","command":"set-mode"}"#);
//! ```

mod event;
mod stdio;

pub use event::{EventBus, LinkEvent, DEFAULT_EVENT_CAPACITY};
pub use stdio::{event_line, spawn_event_printer, write_event_line, write_stdout_line};
