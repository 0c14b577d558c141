//! Directory replay producer.
//!
//! Stands in for a capture pipeline: every file in a directory is one
//! pre-encoded frame, submitted to the hub at a fixed rate in file-name
//! order.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use netshare_core::{BroadcastHub, Frame};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;

/// Replays image files from a directory into a hub.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    fps: u32,
    looping: bool,
    extensions: Vec<String>,
    keepalive: Option<Duration>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = SourceConfig::default();
        Self {
            dir: dir.into(),
            fps: defaults.fps,
            looping: defaults.looping,
            extensions: defaults.extensions,
            keepalive: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.dir.clone())
            .fps(config.fps)
            .looping(config.looping)
            .extensions(config.extensions.clone())
            .keepalive((config.keepalive_secs > 0).then(|| Duration::from_secs(config.keepalive_secs)))
    }

    /// Frames per second, clamped to 1..=120.
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps.clamp(1, 120);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }

    /// Matching files in `dir`, sorted by name.
    pub fn scan(&self) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && self.matches(path))
            .collect();
        files.sort();
        Ok(files)
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|want| *want == ext)
            })
    }

    /// Submit frames until cancelled, or until the files run out when not
    /// looping. Returns the number of frames submitted.
    ///
    /// Once a non-looping replay is exhausted, keepalives are sent at the
    /// configured interval until cancelled.
    pub async fn run(&self, hub: &BroadcastHub, cancel: CancellationToken) -> io::Result<u64> {
        let files = self.scan()?;
        if files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no frame files in {}", self.dir.display()),
            ));
        }
        info!(
            dir = %self.dir.display(),
            files = files.len(),
            fps = self.fps,
            looping = self.looping,
            "replaying frames"
        );

        let mut ticker = tokio::time::interval(self.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut submitted = 0u64;
        'replay: loop {
            for path in &files {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'replay,
                    _ = ticker.tick() => {}
                }

                match tokio::fs::read(path).await {
                    Ok(bytes) if bytes.is_empty() => {
                        debug!(file = %path.display(), "empty file skipped");
                    }
                    Ok(bytes) => {
                        hub.submit_frame(bytes);
                        submitted += 1;
                    }
                    Err(e) => warn!(file = %path.display(), error = %e, "failed to read frame"),
                }
            }
            if !self.looping {
                info!(submitted, "replay finished");
                self.idle(hub, &cancel).await;
                break;
            }
        }
        Ok(submitted)
    }

    async fn idle(&self, hub: &BroadcastHub, cancel: &CancellationToken) {
        let Some(interval) = self.keepalive else {
            return;
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => hub.submit_frame(Frame::keepalive()),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
