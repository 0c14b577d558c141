//! Frame files on disk.

use std::io;
use std::path::{Path, PathBuf};

use netshare_core::Frame;
use tracing::trace;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// File extension for a payload, from its leading magic bytes.
pub fn sniff_extension(payload: &[u8]) -> &'static str {
    if payload.starts_with(JPEG_MAGIC) {
        "jpg"
    } else if payload.starts_with(PNG_MAGIC) {
        "png"
    } else {
        "bin"
    }
}

/// Writes frames into a directory.
///
/// In rolling mode every frame replaces `latest.<ext>`; the file is
/// written beside it first and renamed, so readers never see a partial
/// image. When the format changes the previous `latest.*` is removed.
/// With `keep_all` each frame gets the next `frame-NNNNNN.<ext>`.
#[derive(Debug)]
pub struct FrameWriter {
    dir: PathBuf,
    keep_all: bool,
    written: u64,
    latest: Option<PathBuf>,
}

impl FrameWriter {
    /// Create the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>, keep_all: bool) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            keep_all,
            written: 0,
            latest: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Store one frame, returning the path it ended up at.
    pub async fn write(&mut self, frame: &Frame) -> io::Result<PathBuf> {
        let payload = frame.payload();
        let ext = sniff_extension(payload);

        let path = if self.keep_all {
            let path = self.dir.join(format!("frame-{:06}.{ext}", self.written + 1));
            tokio::fs::write(&path, payload).await?;
            path
        } else {
            let path = self.dir.join(format!("latest.{ext}"));
            let tmp = self.dir.join(format!(".latest.{ext}.tmp"));
            tokio::fs::write(&tmp, payload).await?;
            tokio::fs::rename(&tmp, &path).await?;
            if let Some(previous) = self.latest.replace(path.clone()) {
                if previous != path {
                    remove_stale(&previous).await?;
                }
            }
            path
        };

        self.written += 1;
        trace!(path = %path.display(), len = payload.len(), "frame written");
        Ok(path)
    }
}

async fn remove_stale(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
