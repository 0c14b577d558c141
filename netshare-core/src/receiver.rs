//! Client side of the hub protocol.
//!
//! A [`FrameReceiver`] connects to a hub, reads frames on a background
//! task and hands every non-empty payload to a [`FrameSink`] in wire
//! order. The sink runs on its own task behind a small drop-oldest
//! queue, so a slow consumer loses stale frames instead of stalling the
//! socket.
//!
//! Phase and statistics are published on `watch` channels; a UI can
//! subscribe and redraw on change without polling the receiver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::buffer::FrameBuffer;
use crate::codec::{DEFAULT_MAX_FRAME_SIZE, FrameCodec};
use crate::error::{NetshareError, Result};
use crate::frame::Frame;
use crate::network::{Endpoint, PeerConnection};
use crate::state::{ReceiverPhase, StopReason};
use crate::stats::{FpsMeter, ReceiverStats, ThroughputEstimator};

/// Wait used by the delivery task between queue checks.
const DELIVERY_IDLE_WAIT: Duration = Duration::from_millis(250);

/// Inter-frame gaps averaged by the fps meter.
const FPS_WINDOW: usize = 30;

// ── FrameSink ────────────────────────────────────────────────────

/// Consumer of received frames.
///
/// Called from a background task, one frame at a time, in the order
/// frames arrived. Implementations should return quickly; frames that
/// pile up while the sink is busy are dropped oldest-first.
pub trait FrameSink: Send + Sync + 'static {
    fn on_frame(&self, frame: Frame);
}

impl<F> FrameSink for F
where
    F: Fn(Frame) + Send + Sync + 'static,
{
    fn on_frame(&self, frame: Frame) {
        self(frame)
    }
}

// ── ReceiverConfig ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Upper bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Frames queued for the sink before the oldest is dropped.
    pub delivery_capacity: usize,
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    pub tcp_nodelay: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            delivery_capacity: 8,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            tcp_nodelay: true,
        }
    }
}

impl ReceiverConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity;
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

// ── FrameReceiver ────────────────────────────────────────────────

struct Session {
    peer: Arc<PeerConnection>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

/// Connects to a hub and delivers its frames to a sink.
pub struct FrameReceiver {
    config: ReceiverConfig,
    sink: Arc<dyn FrameSink>,
    phase: Arc<watch::Sender<ReceiverPhase>>,
    stats: Arc<watch::Sender<ReceiverStats>>,
    session: Mutex<Option<Session>>,
    /// Token of the latest `start()`; lets `stop()` abort a pending connect.
    cancel: parking_lot::Mutex<CancellationToken>,
}

impl FrameReceiver {
    pub fn new(config: ReceiverConfig, sink: impl FrameSink) -> Self {
        let (phase, _) = watch::channel(ReceiverPhase::Idle);
        let (stats, _) = watch::channel(ReceiverStats::default());
        Self {
            config,
            sink: Arc::new(sink),
            phase: Arc::new(phase),
            stats: Arc::new(stats),
            session: Mutex::new(None),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    /// Connect to `endpoint` and start streaming.
    ///
    /// Returns once the connection is established. A connect failure
    /// leaves the receiver in `Stopped(ConnectFailed)` and is returned
    /// as an error. Calling `start()` while connecting or streaming is a
    /// no-op.
    pub async fn start(&self, endpoint: &Endpoint) -> Result<()> {
        let mut session = self.session.lock().await;
        if self.phase.borrow().is_active() {
            return Ok(());
        }
        if let Some(old) = session.take() {
            // Finished on its own; reap the driver.
            let _ = old.driver.await;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.stats.send_replace(ReceiverStats::default());
        self.transition(ReceiverPhase::begin_connect)?;

        info!(endpoint = %endpoint, "connecting to hub");
        let codec = FrameCodec::with_max_frame_size(self.config.max_frame_size);
        let connect = PeerConnection::connect(
            endpoint,
            self.config.connect_timeout,
            codec,
            self.config.tcp_nodelay,
        );
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetshareError::Cancelled),
            r = connect => r,
        };

        let peer = match connected {
            Ok(peer) => Arc::new(peer),
            Err(e) => {
                let reason = if e.is_cancelled() {
                    StopReason::Requested
                } else {
                    warn!(endpoint = %endpoint, error = %e, "connect failed");
                    StopReason::ConnectFailed(e.to_string())
                };
                let _ = self.transition(|p| p.finish(reason));
                return Err(e);
            }
        };

        self.transition(ReceiverPhase::begin_streaming)?;
        info!(endpoint = %endpoint, addr = %peer.remote_addr(), "streaming");

        let driver = tokio::spawn(drive(
            Arc::clone(&peer),
            Arc::clone(&self.sink),
            Arc::clone(&self.phase),
            Arc::clone(&self.stats),
            cancel.clone(),
            self.config.delivery_capacity,
        ));
        *session = Some(Session {
            peer,
            cancel,
            driver,
        });
        Ok(())
    }

    /// Close the connection and wait for the background tasks to exit.
    ///
    /// Safe to call at any time and any number of times.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();

        let mut session = self.session.lock().await;
        let Some(Session {
            peer,
            cancel,
            driver,
        }) = session.take()
        else {
            return;
        };
        cancel.cancel();
        peer.close();
        if let Err(e) = driver.await {
            warn!(error = %e, "receiver task panicked");
        }
    }

    pub fn phase(&self) -> ReceiverPhase {
        self.phase.borrow().clone()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ReceiverPhase> {
        self.phase.subscribe()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats.borrow().clone()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<ReceiverStats> {
        self.stats.subscribe()
    }

    /// Wait until the receiver reaches `Stopped` and return why.
    ///
    /// Never resolves for a receiver that was never started.
    pub async fn wait_stopped(&self) -> StopReason {
        let mut rx = self.phase.subscribe();
        match rx.wait_for(ReceiverPhase::is_stopped).await {
            Ok(phase) => phase.stop_reason().cloned().unwrap_or(StopReason::Requested),
            Err(_) => StopReason::Requested,
        }
    }

    fn transition(&self, f: impl FnOnce(&mut ReceiverPhase) -> Result<()>) -> Result<()> {
        let mut outcome = Ok(());
        self.phase.send_if_modified(|phase| {
            outcome = f(phase);
            outcome.is_ok()
        });
        outcome
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.cancel.get_mut().cancel();
        if let Some(session) = self.session.get_mut().take() {
            session.peer.close();
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Run one streaming session to completion, then publish `Stopped`.
async fn drive(
    peer: Arc<PeerConnection>,
    sink: Arc<dyn FrameSink>,
    phase: Arc<watch::Sender<ReceiverPhase>>,
    stats: Arc<watch::Sender<ReceiverStats>>,
    cancel: CancellationToken,
    delivery_capacity: usize,
) {
    let queue = Arc::new(FrameBuffer::new(delivery_capacity));
    let read_done = CancellationToken::new();

    let delivery = tokio::spawn(deliver(
        Arc::clone(&queue),
        sink,
        cancel.clone(),
        read_done.clone(),
    ));

    let reason = read_loop(&peer, &queue, &stats).await;
    peer.close();
    read_done.cancel();

    if let Err(e) = delivery.await {
        warn!(error = %e, "frame sink panicked");
    }

    info!(reason = %reason, "receiver stopped");
    phase.send_if_modified(|p| p.finish(reason).is_ok());
}

async fn read_loop(
    peer: &PeerConnection,
    queue: &FrameBuffer,
    stats: &watch::Sender<ReceiverStats>,
) -> StopReason {
    let mut fps = FpsMeter::new(FPS_WINDOW);
    let mut throughput = ThroughputEstimator::new();

    loop {
        match peer.read_frame().await {
            Ok(frame) if frame.is_empty() => {
                trace!("keepalive");
                stats.send_modify(|s| s.keepalives += 1);
            }
            Ok(frame) => {
                let len = frame.len() as u64;
                fps.tick();
                throughput.record(len);
                let dropped = queue.push(frame).is_some();

                stats.send_modify(|s| {
                    s.frames_received += 1;
                    s.bytes_received += len;
                    if dropped {
                        s.frames_dropped += 1;
                    }
                    s.fps = fps.fps();
                    s.throughput_bps = throughput.bps();
                });
            }
            Err(NetshareError::Cancelled) => return StopReason::Requested,
            Err(NetshareError::EndOfStream) => return StopReason::EndOfStream,
            Err(e) => {
                warn!(error = %e, "read failed");
                return StopReason::ReadFailed(e.to_string());
            }
        }
    }
}

/// Feed queued frames to the sink until cancelled, or until the read
/// side is done and the queue is empty.
async fn deliver(
    queue: Arc<FrameBuffer>,
    sink: Arc<dyn FrameSink>,
    cancel: CancellationToken,
    read_done: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        if read_done.is_cancelled() {
            while let Some(frame) = queue.pop() {
                sink.on_frame(frame);
            }
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = read_done.cancelled() => {}
            next = queue.pop_wait(DELIVERY_IDLE_WAIT) => {
                if let Some(frame) = next {
                    sink.on_frame(frame);
                }
            }
        }
    }
    debug!("delivery task exited");
}

// ── Tests ────────────────────────────────────────────────────────
