//! Configuration for the hub binary.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netshare_core::{HubConfig, RelayMode};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubFileConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Frame buffer tuning.
    pub buffer: BufferConfig,
    /// Peer upload handling.
    pub relay: RelaySection,
    /// Frame producer.
    pub source: SourceConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to bind.
    pub bind_host: String,
    /// First port of the scan.
    pub base_port: u16,
    /// Last port of the scan (inclusive).
    pub max_port: u16,
    /// Maximum concurrent peers (0 = unlimited).
    pub max_peers: usize,
    /// Per-peer write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Disable Nagle on accepted sockets.
    pub tcp_nodelay: bool,
}

/// Frame buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Frames kept before the oldest is evicted.
    pub capacity: usize,
    /// Broadcast loop wait on an empty buffer, in milliseconds.
    pub poll_interval_ms: u64,
    /// Largest frame accepted from peers, in bytes.
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// "disabled", "buffered" or "direct".
    pub mode: RelayMode,
}

/// Directory replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory of frame files. Empty disables the producer.
    pub dir: PathBuf,
    /// Frames per second.
    pub fps: u32,
    /// Restart from the first file after the last one.
    pub looping: bool,
    /// File extensions picked up from `dir` (case-insensitive).
    pub extensions: Vec<String>,
    /// Keepalive interval once the source is exhausted (0 = off).
    pub keepalive_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Seconds between stats log lines (0 = off).
    pub stats_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        let core = HubConfig::default();
        Self {
            bind_host: core.bind_host,
            base_port: core.base_port,
            max_port: core.max_port,
            max_peers: core.max_peers,
            write_timeout_ms: core.write_timeout.as_millis() as u64,
            tcp_nodelay: core.tcp_nodelay,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        let core = HubConfig::default();
        Self {
            capacity: core.buffer_capacity,
            poll_interval_ms: core.poll_interval.as_millis() as u64,
            max_frame_size: core.max_frame_size,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            fps: 10,
            looping: true,
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            keepalive_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            stats_interval_secs: 30,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HubFileConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one
    /// is an error.
    pub fn load(path: &Path) -> io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Whether a frame producer is configured.
    pub fn has_source(&self) -> bool {
        !self.source.dir.as_os_str().is_empty()
    }

    /// Convert into the core hub configuration.
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig::default()
            .bind_host(self.network.bind_host.clone())
            .port_range(self.network.base_port, self.network.max_port)
            .max_peers(self.network.max_peers)
            .write_timeout(Duration::from_millis(self.network.write_timeout_ms.max(1)))
            .tcp_nodelay(self.network.tcp_nodelay)
            .buffer_capacity(self.buffer.capacity.max(1))
            .poll_interval(Duration::from_millis(self.buffer.poll_interval_ms.max(1)))
            .max_frame_size(self.buffer.max_frame_size)
            .relay(self.relay.mode)
    }
}

// ── Tests ────────────────────────────────────────────────────────
