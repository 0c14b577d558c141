//! netshare hub entry point.
//!
//! ```text
//! netshare-hub                       Listen on the first free port in 8080..=8099
//! netshare-hub --config <path>       Load a custom config TOML
//! netshare-hub --gen-config          Write default config to stdout
//! netshare-hub --write-config <path> Write default config to a file
//! netshare-hub --source <dir>        Replay frame files from a directory
//! netshare-hub --relay buffered      Relay frames uploaded by peers
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use netshare_core::{BroadcastHub, HubStatus, RelayMode};
use netshare_hub::config::HubFileConfig;
use netshare_hub::source::DirectorySource;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RelayArg {
    Disabled,
    Buffered,
    Direct,
}

impl From<RelayArg> for RelayMode {
    fn from(arg: RelayArg) -> Self {
        match arg {
            RelayArg::Disabled => RelayMode::Disabled,
            RelayArg::Buffered => RelayMode::Buffered,
            RelayArg::Direct => RelayMode::Direct,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "netshare-hub", about = "Broadcast encoded frames to connected viewers")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "netshare-hub.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to this file and exit.
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// First port of the scan (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer upload handling (overrides config).
    #[arg(long, value_enum)]
    relay: Option<RelayArg>,

    /// Directory of frame files to replay (overrides config).
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Replay rate in frames per second (overrides config).
    #[arg(long)]
    fps: Option<u32>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&HubFileConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if let Some(path) = &cli.write_config {
        HubFileConfig::write_default(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let (mut config, load_error) = match HubFileConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (HubFileConfig::default(), Some(e)),
    };
    if let Some(port) = cli.port {
        config.network.base_port = port;
        config.network.max_port = config.network.max_port.max(port);
    }
    if let Some(relay) = cli.relay {
        config.relay.mode = relay.into();
    }
    if let Some(dir) = cli.source {
        config.source.dir = dir;
    }
    if let Some(fps) = cli.fps {
        config.source.fps = fps;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("netshare-hub v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        warn!("invalid config {}: {e}; using defaults", cli.config.display());
    }
    info!(
        "port range: {}..={}",
        config.network.base_port, config.network.max_port
    );
    info!("relay: {}", config.relay.mode);

    let hub = Arc::new(BroadcastHub::new(config.to_hub_config()));
    let port = hub.start().await?;
    println!("Port: {port}");

    let cancel = CancellationToken::new();

    // Ctrl-C handler.
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        ctrl_c.cancel();
    });

    // Peer count changes.
    let mut status = hub.status();
    let status_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = status_cancel.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let HubStatus::Listening { port, peers } = *status.borrow_and_update() {
                        info!(port, peers, "peers changed");
                    }
                }
            }
        }
    });

    // Periodic stats.
    if config.logging.stats_interval_secs > 0 {
        let stats_hub = Arc::clone(&hub);
        let stats_cancel = cancel.clone();
        let every = Duration::from_secs(config.logging.stats_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stats_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let s = stats_hub.stats();
                        info!(
                            peers = stats_hub.peer_count(),
                            submitted = s.frames_submitted,
                            broadcast = s.frames_broadcast,
                            evicted = s.frames_evicted,
                            relayed = s.frames_relayed,
                            bytes_sent = s.bytes_sent,
                            dropped_peers = s.peers_dropped,
                            "stats"
                        );
                    }
                }
            }
        });
    }

    if config.has_source() {
        let source = DirectorySource::from_config(&config.source);
        match source.run(&hub, cancel.clone()).await {
            Ok(submitted) => info!(submitted, "source finished"),
            Err(e) => error!("frame source failed: {e}"),
        }
    } else {
        warn!("no frame source configured");
    }

    cancel.cancelled().await;
    hub.stop().await;
    Ok(())
}
