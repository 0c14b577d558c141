//! # netshare-core
//!
//! Frame relay library for streaming encoded screen frames over TCP.
//!
//! This crate contains:
//! - **Frame**: `Frame` and `PeerId`, the unit carried on the wire
//! - **Codec**: `FrameCodec`, u32 big-endian length-prefixed framing via `tokio_util`
//! - **Buffer**: `FrameBuffer`, bounded drop-oldest queue with an async wait
//! - **Network**: `Endpoint`, `PeerConnection` and `PeerRegistry`
//! - **Hub**: `BroadcastHub`, port-scanning fan-out server with optional relay
//! - **Receiver**: `FrameReceiver`, client that feeds frames to a `FrameSink`
//! - **State**: receiver lifecycle state machine
//! - **Stats**: hub counters, fps and throughput estimation
//! - **Error**: `NetshareError`, a typed `thiserror`-based error hierarchy

pub mod buffer;
pub mod codec;
pub mod error;
pub mod frame;
pub mod hub;
pub mod network;
pub mod receiver;
pub mod state;
pub mod stats;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::{DEFAULT_BUFFER_CAPACITY, FrameBuffer};
pub use codec::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, FrameCodec};
pub use error::{NetshareError, Result};
pub use frame::{Frame, PeerId};
pub use hub::{BroadcastHub, HubConfig, HubStatus, RelayMode};
pub use network::{Endpoint, PeerConnection, PeerRegistry};
pub use receiver::{FrameReceiver, FrameSink, ReceiverConfig};
pub use state::{ReceiverPhase, StopReason};
pub use stats::{FpsMeter, HubStats, ReceiverStats, ThroughputEstimator};
