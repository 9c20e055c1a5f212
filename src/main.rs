//! `mmdvm-link` - run an MMDVM modem link from a TOML configuration.
//!
//! Link events are printed on stdout as JSON lines; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use mmdvm_link::config::HostConfig;
use mmdvm_link::status::spawn_event_printer;
use mmdvm_link::{logging, HostBuilder, Result};

#[derive(Debug, Parser)]
#[command(name = "mmdvm-link", version, about = "Host link engine for MMDVM modems")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, env = "MMDVM_LINK_CONFIG", default_value = "mmdvm-link.toml")]
    config: PathBuf,

    /// Serial port, overriding `[modem] port`.
    #[arg(short, long)]
    port: Option<String>,

    /// Do not print link events on stdout.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "mmdvm-link stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = HostConfig::load(&cli.config)?;
    let port = cli.port.unwrap_or_else(|| config.modem.port.clone());

    let mut host = HostBuilder::from_config(&config)?
        .open_serial(&port, config.modem.baud)
        .await?;

    let printer = (!cli.quiet).then(|| spawn_event_printer(host.events()));

    // No network side in the standalone binary: keep the bridges drained.
    for mode in config.enabled_modes()? {
        if let Some(mut endpoint) = host.take_endpoint(mode) {
            tokio::spawn(async move {
                while let Some(frame) = endpoint.recv().await {
                    tracing::trace!(%mode, len = frame.len(), "Received frame");
                }
            });
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, returning modem to IDLE"),
        _ = host.wait_for_shutdown() => tracing::warn!("Modem link lost"),
    }

    let result = host.shutdown().await;
    if let Some(printer) = printer {
        let _ = tokio::time::timeout(Duration::from_millis(200), printer).await;
    }
    result
}
