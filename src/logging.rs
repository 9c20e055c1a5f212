//! Tracing subscriber setup.
//!
//! Logs go to stderr; stdout carries the JSON-line event stream.
//!
//! Levels:
//! - ERROR: link failure, surfaced command rejections
//! - WARN: timeouts, lockout, drain loss, framing trouble
//! - INFO: handshake, mode changes
//! - DEBUG: commands, buffer backoff, dropped frames
//! - TRACE: individual frames

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format (`json` or text).
pub const LOG_FORMAT_ENV: &str = "MMDVM_LOG_FORMAT";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. `RUST_LOG` sets the filter (default
/// `info`); `MMDVM_LOG_FORMAT=json` switches to JSON lines.
pub fn init() {
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter("info"))
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Subscriber for tests; safe to call more than once.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
