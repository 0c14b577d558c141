//! Broadcast hub: accept loop, broadcast loop and per-peer read loops.
//!
//! ```text
//!  submit_frame() ──► FrameBuffer ──► broadcast loop ──┬──► peer#1
//!                        ▲                             ├──► peer#2
//!                        │ (RelayMode::Buffered)       └──► peer#N
//!  peer read loops ──────┘
//! ```
//!
//! Every `start()` creates a fresh session: a new listener, buffer,
//! registry and counters. `stop()` cancels the session token, which
//! unblocks `accept()` and the buffer wait, then force-closes every peer
//! so writes stuck on a stalled socket return at once, and waits for all
//! tasks to finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::buffer::{DEFAULT_BUFFER_CAPACITY, FrameBuffer};
use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec};
use crate::error::{NetshareError, Result};
use crate::frame::{Frame, PeerId};
use crate::network::{PeerConnection, PeerRegistry};
use crate::stats::{HubCounters, HubStats};

/// Pause after a failed `accept()` so a persistent error (e.g. fd
/// exhaustion) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ── RelayMode ────────────────────────────────────────────────────

/// What the hub does with frames uploaded by peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Pure fan-out: inbound frames are read and discarded.
    #[default]
    Disabled,
    /// Inbound frames join the frame buffer, tagged with their origin.
    Buffered,
    /// Inbound frames are written straight to every other peer.
    Direct,
}

impl std::fmt::Display for RelayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Buffered => write!(f, "buffered"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

// ── HubConfig ────────────────────────────────────────────────────

/// Hub configuration options.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Interface to listen on.
    pub bind_host: String,

    /// First port tried.
    pub base_port: u16,

    /// Last port tried (inclusive).
    pub max_port: u16,

    /// Frame buffer capacity.
    pub buffer_capacity: usize,

    /// Maximum concurrent peers (0 = unlimited).
    pub max_peers: usize,

    /// Handling of frames uploaded by peers.
    pub relay: RelayMode,

    /// A peer that cannot take a frame within this time is dropped.
    pub write_timeout: Duration,

    /// Bounded wait used by the broadcast loop on an empty buffer.
    pub poll_interval: Duration,

    /// Largest accepted frame payload.
    pub max_frame_size: usize,

    /// Enable TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".into(),
            base_port: 8080,
            max_port: 8099,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_peers: 0,
            relay: RelayMode::Disabled,
            write_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tcp_nodelay: true,
        }
    }
}

impl HubConfig {
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Scan `base..=max` for a free port. `(0, 0)` lets the OS pick.
    pub fn port_range(mut self, base: u16, max: u16) -> Self {
        self.base_port = base;
        self.max_port = max;
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn max_peers(mut self, max: usize) -> Self {
        self.max_peers = max;
        self
    }

    pub fn relay(mut self, mode: RelayMode) -> Self {
        self.relay = mode;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

// ── HubStatus ────────────────────────────────────────────────────

/// Observable hub state, suitable for a status line ("Port: 8081").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HubStatus {
    #[default]
    Stopped,
    Listening { port: u16, peers: usize },
}

// ── Session ──────────────────────────────────────────────────────

/// State shared by the tasks of one hub session.
struct Shared {
    config: HubConfig,
    port: u16,
    buffer: FrameBuffer,
    registry: PeerRegistry,
    counters: HubCounters,
    cancel: CancellationToken,
    tracker: TaskTracker,
    status: Arc<watch::Sender<HubStatus>>,
    next_peer_id: AtomicU64,
}

struct HubSession {
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
    broadcast: JoinHandle<()>,
}

// ── BroadcastHub ─────────────────────────────────────────────────

/// Fan-out (and optionally relay) server for encoded frames.
pub struct BroadcastHub {
    config: HubConfig,
    session: tokio::sync::Mutex<Option<HubSession>>,
    /// Fast path for `submit_frame`, which must never await.
    current: parking_lot::Mutex<Option<Arc<Shared>>>,
    status: Arc<watch::Sender<HubStatus>>,
    last_stats: parking_lot::Mutex<HubStats>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        let (status, _) = watch::channel(HubStatus::Stopped);
        Self {
            config,
            session: tokio::sync::Mutex::new(None),
            current: parking_lot::Mutex::new(None),
            status: Arc::new(status),
            last_stats: parking_lot::Mutex::new(HubStats::default()),
        }
    }

    /// Bind the first free port in the configured range and spawn the
    /// accept and broadcast loops.
    ///
    /// Returns the bound port. Calling `start()` on a running hub returns
    /// the current port without side effects.
    pub async fn start(&self) -> Result<u16> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.shared.port);
        }

        let (listener, port) =
            bind_first_free(&self.config.bind_host, self.config.base_port, self.config.max_port)
                .await?;

        let shared = Arc::new(Shared {
            config: self.config.clone(),
            port,
            buffer: FrameBuffer::new(self.config.buffer_capacity),
            registry: PeerRegistry::new(),
            counters: HubCounters::default(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            status: Arc::clone(&self.status),
            next_peer_id: AtomicU64::new(1),
        });

        info!(
            host = %self.config.bind_host,
            port,
            relay = %self.config.relay,
            buffer = self.config.buffer_capacity,
            "hub listening"
        );
        shared.publish_status();

        let accept = tokio::spawn(accept_loop(Arc::clone(&shared), listener));
        let broadcast = tokio::spawn(broadcast_loop(Arc::clone(&shared)));

        *self.current.lock() = Some(Arc::clone(&shared));
        *session = Some(HubSession {
            shared,
            accept,
            broadcast,
        });
        Ok(port)
    }

    /// Queue a frame for broadcast. Never blocks.
    ///
    /// While the hub is stopped the frame is discarded.
    pub fn submit_frame(&self, frame: impl Into<Frame>) {
        let Some(shared) = self.current.lock().clone() else {
            trace!("hub stopped, frame discarded");
            return;
        };

        HubCounters::bump(&shared.counters.frames_submitted);
        if shared.buffer.push(frame.into()).is_some() {
            trace!("buffer full, oldest frame evicted");
        }
    }

    /// Close the listener and every peer, then wait for all loops to exit.
    ///
    /// No-op when the hub is not running.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let Some(HubSession {
            shared,
            accept,
            broadcast,
        }) = session.take()
        else {
            return;
        };
        self.current.lock().take();

        shared.cancel.cancel();
        // The accept loop owns the listener; its exit closes the socket.
        // Once it is gone no new peer can be registered.
        if let Err(e) = accept.await {
            warn!(error = %e, "accept loop panicked");
        }

        // Closing a peer cancels any write in flight on it, so the
        // broadcast loop cannot stay parked on a peer that stopped reading.
        let peers = shared.registry.drain();
        let closed = peers.len();
        for peer in peers {
            peer.close();
        }

        if let Err(e) = broadcast.await {
            warn!(error = %e, "broadcast loop panicked");
        }

        shared.tracker.close();
        shared.tracker.wait().await;

        let stats = shared.counters.snapshot(shared.buffer.evicted());
        info!(
            port = shared.port,
            closed_peers = closed,
            broadcast = stats.frames_broadcast,
            evicted = stats.frames_evicted,
            "hub stopped"
        );
        *self.last_stats.lock() = stats;
        self.status.send_replace(HubStatus::Stopped);
    }

    /// Bound port of the running session.
    pub fn port(&self) -> Option<u16> {
        self.current.lock().as_ref().map(|s| s.port)
    }

    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.current
            .lock()
            .as_ref()
            .map_or(0, |s| s.registry.len())
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.current
            .lock()
            .as_ref()
            .map_or_else(Vec::new, |s| s.registry.ids())
    }

    /// Frames waiting in the buffer.
    pub fn buffered_frames(&self) -> usize {
        self.current
            .lock()
            .as_ref()
            .map_or(0, |s| s.buffer.len())
    }

    /// Counters of the running session, or of the last one once stopped.
    pub fn stats(&self) -> HubStats {
        match self.current.lock().as_ref() {
            Some(s) => s.counters.snapshot(s.buffer.evicted()),
            None => self.last_stats.lock().clone(),
        }
    }

    /// Watch channel reporting the bound port and live peer count.
    pub fn status(&self) -> watch::Receiver<HubStatus> {
        self.status.subscribe()
    }
}

impl Shared {
    fn publish_status(&self) {
        self.status.send_replace(HubStatus::Listening {
            port: self.port,
            peers: self.registry.len(),
        });
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::with_max_frame_size(self.config.max_frame_size)
    }

    /// Register an accepted socket and spawn its read loop.
    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if self.config.max_peers > 0 && self.registry.len() >= self.config.max_peers {
            HubCounters::bump(&self.counters.peers_rejected);
            warn!(addr = %addr, max = self.config.max_peers, "peer rejected: limit reached");
            return;
        }

        if self.config.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!(addr = %addr, error = %e, "failed to configure socket");
                return;
            }
        }

        let id = PeerId(self.next_peer_id.fetch_add(1, Ordering::Relaxed));
        let peer = Arc::new(PeerConnection::new(id, stream, addr, self.codec()));
        self.registry.insert(Arc::clone(&peer));
        HubCounters::bump(&self.counters.peers_accepted);
        info!(peer = %id, addr = %addr, peers = self.registry.len(), "peer connected");
        self.publish_status();

        self.tracker.spawn(peer_loop(Arc::clone(self), peer));
    }

    /// Remove a failed peer and close it. Returns `false` if it was
    /// already gone.
    fn drop_peer(&self, id: PeerId) -> bool {
        let Some(peer) = self.registry.remove(id) else {
            return false;
        };
        peer.close();
        HubCounters::bump(&self.counters.peers_dropped);
        if !self.cancel.is_cancelled() {
            self.publish_status();
        }
        true
    }

    /// Write `frame` to every registered peer except its origin.
    ///
    /// Writes run concurrently and each is bounded by `write_timeout`;
    /// a failing peer is dropped without affecting the others.
    async fn fan_out(&self, frame: &Frame) {
        let targets: Vec<Arc<PeerConnection>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|peer| Some(peer.id()) != frame.origin())
            .collect();

        if targets.is_empty() {
            trace!(len = frame.len(), "no peers, frame discarded");
            return;
        }

        let timeout = self.config.write_timeout;
        let writes = targets.iter().map(move |peer| async move {
            let result = peer.write_frame_timeout(frame, timeout).await;
            (peer, result)
        });

        for (peer, result) in futures::future::join_all(writes).await {
            match result {
                Ok(()) => HubCounters::add(&self.counters.bytes_sent, frame.len() as u64),
                // Closed concurrently by stop() or its own read loop.
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if self.drop_peer(peer.id()) {
                        warn!(peer = %peer.id(), error = %e, "write failed, peer dropped");
                    }
                }
            }
        }
    }

    /// Handle a frame uploaded by `peer` according to the relay mode.
    async fn relay(&self, peer: PeerId, frame: Frame) {
        match self.config.relay {
            RelayMode::Disabled => {
                trace!(peer = %peer, len = frame.len(), "relay disabled, inbound frame discarded");
            }
            RelayMode::Buffered => {
                HubCounters::bump(&self.counters.frames_relayed);
                self.buffer.push(Frame::from_peer(peer, frame.into_payload()));
            }
            RelayMode::Direct => {
                HubCounters::bump(&self.counters.frames_relayed);
                self.fan_out(&Frame::from_peer(peer, frame.into_payload()))
                    .await;
            }
        }
    }
}

// ── Loops ────────────────────────────────────────────────────────

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            r = listener.accept() => r,
        };

        match accepted {
            Ok((stream, addr)) => shared.admit(stream, addr),
            Err(e) => {
                warn!(error = %NetshareError::Accept(e), "accept error, continuing");
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
    drop(listener);
    debug!(port = shared.port, "accept loop exited");
}

async fn broadcast_loop(shared: Arc<Shared>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            f = shared.buffer.pop_wait(shared.config.poll_interval) => f,
        };
        let Some(frame) = next else {
            continue;
        };

        HubCounters::bump(&shared.counters.frames_broadcast);
        shared.fan_out(&frame).await;
    }
    debug!(port = shared.port, "broadcast loop exited");
}

/// Reads frames uploaded by one peer until it disconnects or is closed.
async fn peer_loop(shared: Arc<Shared>, peer: Arc<PeerConnection>) {
    let id = peer.id();
    loop {
        match peer.read_frame().await {
            Ok(frame) if frame.is_empty() => {
                HubCounters::bump(&shared.counters.keepalives);
                trace!(peer = %id, "keepalive");
            }
            Ok(frame) => shared.relay(id, frame).await,
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                if shared.drop_peer(id) {
                    if e.is_disconnect() {
                        info!(peer = %id, "peer disconnected");
                    } else {
                        warn!(peer = %id, error = %e, "read failed, peer dropped");
                    }
                }
                break;
            }
        }
    }
    trace!(peer = %id, "peer loop exited");
}

/// Bind the first port in `start..=end` that is free on `host`.
async fn bind_first_free(host: &str, start: u16, end: u16) -> Result<(TcpListener, u16)> {
    for port in start..=end {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener.local_addr()?.port();
                return Ok((listener, bound));
            }
            Err(e) => debug!(port, error = %e, "port unavailable, trying next"),
        }
    }
    Err(NetshareError::Bind {
        host: host.to_string(),
        start,
        end,
    })
}

// ── Tests ────────────────────────────────────────────────────────
