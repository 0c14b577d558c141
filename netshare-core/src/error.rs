//! Domain-specific error types for the netshare relay.
//!
//! All fallible operations return `Result<T, NetshareError>`.
//! Per-peer failures are values, never panics: the hub isolates them and
//! keeps serving the remaining peers.

use std::time::Duration;
use thiserror::Error;

use crate::frame::PeerId;

/// Convenient alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetshareError>;

/// The canonical error type for the netshare relay.
#[derive(Debug, Error)]
pub enum NetshareError {
    // ── Startup Errors ───────────────────────────────────────────
    /// No port in the configured range could be bound.
    #[error("no free port on {host} in range {start}..={end}")]
    Bind { host: String, start: u16, end: u16 },

    /// The receiver could not reach the hub.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The receiver did not complete the TCP connect in time.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// An endpoint string could not be parsed as `host:port`.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Connection Errors ────────────────────────────────────────
    /// `accept()` on the listening socket failed. Transient.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Writing a frame to a peer failed; the peer is dropped.
    #[error("write to {peer} failed: {source}")]
    PeerWrite {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    /// Reading a frame from a peer failed; the connection is torn down.
    #[error("read from {peer} failed: {source}")]
    PeerRead {
        peer: PeerId,
        #[source]
        source: std::io::Error,
    },

    /// The remote end closed the stream at a frame boundary.
    #[error("end of stream")]
    EndOfStream,

    /// The operation was interrupted by `close()` / `stop()`.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Framing Errors ───────────────────────────────────────────
    /// A frame length exceeded the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The TCP/IO layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // ── State Errors ─────────────────────────────────────────────
    /// A state-machine transition was not valid from the current phase.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl NetshareError {
    /// Whether this error is the result of a deliberate shutdown rather
    /// than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, NetshareError::Cancelled)
    }

    /// Whether the remote end went away (clean EOF or reset).
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetshareError::EndOfStream => true,
            NetshareError::Io(e)
            | NetshareError::PeerRead { source: e, .. }
            | NetshareError::PeerWrite { source: e, .. } => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for NetshareError {
    fn from(s: String) -> Self {
        NetshareError::Other(s)
    }
}

impl From<&str> for NetshareError {
    fn from(s: &str) -> Self {
        NetshareError::Other(s.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for NetshareError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        NetshareError::Timeout(Duration::ZERO)
    }
}
