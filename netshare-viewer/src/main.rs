//! netshare viewer entry point.
//!
//! ```text
//! netshare-viewer                        Connect with defaults
//! netshare-viewer --hub 10.0.0.2:8081    Connect to a specific hub
//! netshare-viewer --config <path>        Use custom config TOML
//! netshare-viewer --gen-config           Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use netshare_core::{Endpoint, Frame, FrameReceiver, StopReason};
use netshare_viewer::config::ViewerConfig;
use netshare_viewer::output::FrameWriter;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "netshare-viewer", about = "Receive frames from a netshare hub")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "netshare-viewer.toml")]
    config: PathBuf,

    /// Hub address (overrides config). Example: 192.168.1.100:8080
    #[arg(long)]
    hub: Option<String>,

    /// Output directory (overrides config).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep every frame instead of overwriting `latest.<ext>`.
    #[arg(long)]
    keep_all: bool,

    /// Reconnect after the stream ends, waiting this many seconds.
    #[arg(long)]
    reconnect: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut config, load_error) = match ViewerConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (ViewerConfig::default(), Some(e)),
    };
    if let Some(addr) = cli.hub {
        config.network.hub = addr;
    }
    if let Some(dir) = cli.output {
        config.output.dir = dir;
    }
    if cli.keep_all {
        config.output.keep_all = true;
    }
    if let Some(secs) = cli.reconnect {
        config.network.reconnect_secs = secs;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("netshare-viewer v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("invalid config {}: {e}; using defaults", cli.config.display());
    }

    let endpoint: Endpoint = config.network.hub.parse()?;
    let mut writer = FrameWriter::new(&config.output.dir, config.output.keep_all)?;
    info!("writing frames to {}", writer.dir().display());

    // The sink runs on the receiver's delivery task; hand frames to the
    // main loop without blocking it.
    let (tx, mut rx) = mpsc::channel::<Frame>(config.network.buffer_size.max(1));
    let receiver = FrameReceiver::new(config.to_receiver_config(), move |frame: Frame| {
        if tx.try_send(frame).is_err() {
            debug!("writer busy, frame dropped");
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    'session: loop {
        if let Err(e) = receiver.start(&endpoint).await {
            error!("cannot reach hub at {endpoint}: {e}");
        }

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    receiver.stop().await;
                    break StopReason::Requested;
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = writer.write(&frame).await {
                        warn!("failed to write frame: {e}");
                    }
                }
                reason = receiver.wait_stopped() => break reason,
            }
        };

        // Frames delivered just before the stream ended.
        while let Ok(frame) = rx.try_recv() {
            if let Err(e) = writer.write(&frame).await {
                warn!("failed to write frame: {e}");
            }
        }

        let stats = receiver.stats();
        info!(
            frames = stats.frames_received,
            bytes = stats.bytes_received,
            dropped = stats.frames_dropped,
            written = writer.written(),
            "session ended: {reason}"
        );

        if reason == StopReason::Requested {
            break;
        }
        let Some(delay) = config.reconnect_delay() else {
            break;
        };
        info!("reconnecting in {}s", delay.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => break 'session,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Ok(())
}
