//! Viewer configuration.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netshare_core::{DEFAULT_MAX_FRAME_SIZE, ReceiverConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Where frames are written.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hub address, `host:port`.
    pub hub: String,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
    /// Seconds to wait before reconnecting after the stream ends (0 = exit).
    pub reconnect_secs: u64,
    /// Max frames queued for the writer before dropping.
    pub buffer_size: usize,
    /// Largest accepted frame, in bytes.
    pub max_frame_size: usize,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving frame files.
    pub dir: PathBuf,
    /// Keep every frame as `frame-NNNNNN.<ext>` instead of overwriting `latest.<ext>`.
    pub keep_all: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hub: "127.0.0.1:8080".into(),
            timeout_ms: 5000,
            reconnect_secs: 0,
            buffer_size: 8,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frames"),
            keep_all: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ViewerConfig {
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

    /// Delay before reconnecting, if reconnects are enabled.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.network.reconnect_secs > 0).then(|| Duration::from_secs(self.network.reconnect_secs))
    }

    pub fn to_receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig::default()
            .connect_timeout(Duration::from_millis(self.network.timeout_ms.max(1)))
            .delivery_capacity(self.network.buffer_size.max(1))
            .max_frame_size(self.network.max_frame_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ViewerConfig::default();
        assert_eq!(cfg.network.hub, "127.0.0.1:8080");
        assert!(!cfg.output.keep_all);
        assert!(cfg.reconnect_delay().is_none());
    }

    #[test]
    fn parse_partial() {
        let cfg: ViewerConfig = toml::from_str(
            r#"
            [network]
            hub = "10.0.0.2:8083"
            reconnect_secs = 3

            [output]
            keep_all = true
        "#,
        )
        .unwrap();
        assert_eq!(cfg.network.hub, "10.0.0.2:8083");
        assert_eq!(cfg.reconnect_delay(), Some(Duration::from_secs(3)));
        assert!(cfg.output.keep_all);
        assert_eq!(cfg.output.dir, PathBuf::from("frames"));
    }

    #[test]
    fn load_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netshare-viewer.toml");
        let cfg = ViewerConfig::load(&path).unwrap();
        assert_eq!(cfg.network.hub, "127.0.0.1:8080");

        std::fs::write(&path, "[output]\nkeep_all = 3\n").unwrap();
        let err = ViewerConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        std::fs::write(&path, "[network]\nreconnect_secs = 2\n").unwrap();
        let cfg = ViewerConfig::load(&path).unwrap();
        assert_eq!(cfg.reconnect_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn receiver_config_mapping() {
        let mut cfg = ViewerConfig::default();
        cfg.network.timeout_ms = 1500;
        cfg.network.buffer_size = 0;
        let rc = cfg.to_receiver_config();
        assert_eq!(rc.connect_timeout, Duration::from_millis(1500));
        assert_eq!(rc.delivery_capacity, 1);
    }
}
