//! Receiver lifecycle state machine.
//!
//! Models the lifecycle of a [`FrameReceiver`](crate::receiver::FrameReceiver)
//! with validated transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::NetshareError;

// ── StopReason ───────────────────────────────────────────────────

/// Why a receiver reached [`ReceiverPhase::Stopped`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The TCP connect failed or timed out.
    ConnectFailed(String),
    /// The hub closed the stream.
    EndOfStream,
    /// A read or framing error ended the stream.
    ReadFailed(String),
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "stopped by request"),
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::EndOfStream => write!(f, "hub closed the connection"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
        }
    }
}

// ── ReceiverPhase ────────────────────────────────────────────────

/// ```text
///  Idle ──► Connecting ──► Streaming
///              │               │
///              ▼               ▼
///           Stopped ◄──────────┘
///              │
///              └──► Connecting   (fresh start() only)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReceiverPhase {
    /// Never started.
    #[default]
    Idle,

    /// TCP connect in progress.
    Connecting,

    /// Connected; the read loop is running.
    Streaming {
        /// When the connection entered the `Streaming` state.
        since: Instant,
    },

    /// Terminal until the next `start()`.
    Stopped(StopReason),
}

impl std::fmt::Display for ReceiverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming { .. } => write!(f, "Streaming"),
            Self::Stopped(_) => write!(f, "Stopped"),
        }
    }
}

impl ReceiverPhase {
    /// `true` while connecting or streaming.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming { .. })
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        match self {
            Self::Stopped(reason) => Some(reason),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Idle`, `Stopped`.
    pub fn begin_connect(&mut self) -> Result<(), NetshareError> {
        match self {
            Self::Idle | Self::Stopped(_) => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(NetshareError::InvalidState(
                "cannot connect: receiver already active",
            )),
        }
    }

    /// Transition to `Streaming`.
    ///
    /// Valid from: `Connecting`.
    pub fn begin_streaming(&mut self) -> Result<(), NetshareError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(NetshareError::InvalidState(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Transition to `Stopped`.
    ///
    /// Valid from: `Connecting`, `Streaming`.
    pub fn finish(&mut self, reason: StopReason) -> Result<(), NetshareError> {
        match self {
            Self::Connecting | Self::Streaming { .. } => {
                *self = Self::Stopped(reason);
                Ok(())
            }
            _ => Err(NetshareError::InvalidState(
                "cannot stop: receiver not active",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
