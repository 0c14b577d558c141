//! Length-prefixed frame codec for `tokio_util::codec`.
//!
//! ## Wire format
//!
//! ```text
//! length:   u32 big-endian  (4)
//! payload:  [u8]            (length bytes, opaque encoded image)
//! ```
//!
//! There is no magic, version or checksum. A length of zero is a
//! keepalive; it decodes to an empty [`Frame`] which callers skip.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::NetshareError;
use crate::frame::Frame;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload accepted by default (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Codec turning a byte stream into [`Frame`]s and back.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Limit accepted payloads to `max` bytes (capped at `u32::MAX`).
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: max.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = NetshareError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, NetshareError> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&src[..FRAME_HEADER_SIZE]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_size {
            return Err(NetshareError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + len;
        if src.len() < total {
            // Reserve once for the whole frame so large images are not
            // regrown chunk by chunk.
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame::new(payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, NetshareError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream closed mid-frame with {} bytes buffered", src.len()),
            )
            .into()),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = NetshareError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), NetshareError> {
        let len = frame.len();
        if len > self.max_frame_size {
            return Err(NetshareError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        dst.reserve(FRAME_HEADER_SIZE + len);
        dst.put_u32(len as u32);
        dst.extend_from_slice(frame.payload());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
