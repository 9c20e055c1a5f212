//! # mmdvm-link
//!
//! Host-side link engine and mode arbiter for MMDVM-family digital voice
//! modems.
//!
//! The modem speaks one protocol at a time (D-STAR, DMR, YSF, P25, NXDN,
//! M17, FM, AX.25) over a framed serial link. This crate owns that link:
//!
//! - **Frame codec** ([`protocol`]): `E0 | length | type | payload` framing
//!   with resynchronization
//! - **Link session** ([`session`]): one command in flight, timeouts,
//!   keep-alive status queries, per-channel buffer accounting and backoff
//! - **Mode arbiter** ([`arbiter`]): the active mode, the switch sequence
//!   and hang timers
//! - **Bridges** ([`bridge`]): per-protocol endpoints exchanging frames with
//!   network tasks
//!
//! ## Example
//!
//! ```ignore
//! use mmdvm_link::{protocol::Mode, Host};
//!
//! #[tokio::main]
//! async fn main() -> mmdvm_link::Result<()> {
//!     let host = Host::builder()
//!         .forward(Mode::Dmr)
//!         .forward(Mode::Ysf)
//!         .open_serial("/dev/ttyACM0", 115_200)
//!         .await?;
//!
//!     host.wait_for_shutdown().await;
//!     host.shutdown().await
//! }
//! ```

pub mod arbiter;
pub mod backpressure;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;
pub mod writer;

mod host;

pub use arbiter::{Arbiter, ArbiterState, SwitchTrigger};
pub use error::{LinkError, Result};
pub use host::{Host, HostBuilder, DEFAULT_TICK_INTERVAL, DISPATCH_BUDGET};
pub use session::LinkSession;
