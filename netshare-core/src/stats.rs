//! Counters and rate estimation for hubs and receivers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ── HubStats ─────────────────────────────────────────────────────

/// Point-in-time view of a hub session's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Frames handed to `submit_frame` by local producers.
    pub frames_submitted: u64,
    /// Frames evicted from the buffer before they could be broadcast.
    pub frames_evicted: u64,
    /// Frames taken off the buffer and fanned out.
    pub frames_broadcast: u64,
    /// Frames uploaded by peers and relayed to the others.
    pub frames_relayed: u64,
    /// Zero-length keepalives read from peers.
    pub keepalives: u64,
    /// Payload bytes successfully written, summed over all peers.
    pub bytes_sent: u64,
    /// Connections accepted into the registry.
    pub peers_accepted: u64,
    /// Connections refused because the peer limit was reached.
    pub peers_rejected: u64,
    /// Peers removed after a read or write failure.
    pub peers_dropped: u64,
}

/// Lock-free counters shared by the hub's tasks.
#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub frames_submitted: AtomicU64,
    pub frames_broadcast: AtomicU64,
    pub frames_relayed: AtomicU64,
    pub keepalives: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub peers_accepted: AtomicU64,
    pub peers_rejected: AtomicU64,
    pub peers_dropped: AtomicU64,
}

impl HubCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, frames_evicted: u64) -> HubStats {
        HubStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_evicted,
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            keepalives: self.keepalives.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            peers_accepted: self.peers_accepted.load(Ordering::Relaxed),
            peers_rejected: self.peers_rejected.load(Ordering::Relaxed),
            peers_dropped: self.peers_dropped.load(Ordering::Relaxed),
        }
    }
}

// ── ReceiverStats ────────────────────────────────────────────────

/// Receive-side statistics exposed to the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiverStats {
    /// Non-empty frames read from the hub.
    pub frames_received: u64,
    /// Payload bytes read from the hub.
    pub bytes_received: u64,
    /// Zero-length keepalives skipped.
    pub keepalives: u64,
    /// Frames discarded because the sink fell behind.
    pub frames_dropped: u64,
    /// Smoothed frames per second.
    pub fps: f64,
    /// Receive throughput in bytes/second.
    pub throughput_bps: u64,
}

// ── FpsMeter ─────────────────────────────────────────────────────

/// Frame-rate estimate over the last `window` inter-frame gaps.
#[derive(Debug)]
pub struct FpsMeter {
    gaps: VecDeque<Duration>,
    window: usize,
    last: Option<Instant>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            gaps: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            last: None,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if let Some(last) = self.last {
            if self.gaps.len() == self.window {
                self.gaps.pop_front();
            }
            self.gaps.push_back(now.duration_since(last));
        }
        self.last = Some(now);
    }

    pub fn fps(&self) -> f64 {
        if self.gaps.is_empty() {
            return 0.0;
        }
        let avg = self.gaps.iter().map(Duration::as_secs_f64).sum::<f64>() / self.gaps.len() as f64;
        if avg > 0.0 { 1.0 / avg } else { 0.0 }
    }
}

// ── ThroughputEstimator ──────────────────────────────────────────

const SLOTS: usize = 10;

/// Bytes per second over a sliding window.
///
/// The window is split into ten slots held in a ring. The rate is the
/// byte total of the slots inside the window divided by the window
/// length, so a burst is averaged over the whole window and the rate
/// falls to zero once the stream has been quiet for a full window.
#[derive(Debug)]
pub struct ThroughputEstimator {
    slots: [u64; SLOTS],
    slot_len: Duration,
    epoch: Option<Instant>,
    /// Absolute index of the newest slot.
    head: u64,
}

impl ThroughputEstimator {
    /// Create an estimator with a 1-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        let slot_len = (window / SLOTS as u32).max(Duration::from_millis(1));
        Self {
            slots: [0; SLOTS],
            slot_len,
            epoch: None,
            head: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.slot_len * SLOTS as u32
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        let epoch = *self.epoch.get_or_insert(when);
        let idx = self.slot_index(epoch, when);
        if idx > self.head {
            let stale = (idx - self.head).min(SLOTS as u64);
            for i in 1..=stale {
                self.slots[((self.head + i) % SLOTS as u64) as usize] = 0;
            }
            self.head = idx;
        }
        // Samples older than the ring are lost.
        if idx + (SLOTS as u64) > self.head {
            self.slots[(idx % SLOTS as u64) as usize] += bytes;
        }
    }

    /// Current rate in bytes per second.
    pub fn bps(&self) -> u64 {
        self.rate_at(Instant::now())
    }

    /// Rate over the window ending at `now`.
    pub fn rate_at(&self, now: Instant) -> u64 {
        let Some(epoch) = self.epoch else {
            return 0;
        };
        let idx = self.slot_index(epoch, now).max(self.head);
        let oldest = (idx + 1).saturating_sub(SLOTS as u64);
        let bytes: u64 = (oldest..=self.head)
            .filter(|i| i + (SLOTS as u64) > self.head)
            .map(|i| self.slots[(i % SLOTS as u64) as usize])
            .sum();
        (bytes as f64 / self.window().as_secs_f64()) as u64
    }

    fn slot_index(&self, epoch: Instant, at: Instant) -> u64 {
        (at.saturating_duration_since(epoch).as_nanos() / self.slot_len.as_nanos()) as u64
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_estimator_returns_zero() {
        assert_eq!(ThroughputEstimator::new().bps(), 0);
    }

    #[test]
    fn single_sample_is_spread_over_the_window() {
        let mut est = ThroughputEstimator::with_window(Duration::from_secs(1));
        let t0 = Instant::now();
        est.record_at(t0, 1000);
        assert_eq!(est.rate_at(t0), 1000);
    }

    #[test]
    fn steady_stream_matches_its_rate() {
        let mut est = ThroughputEstimator::with_window(Duration::from_secs(1));
        let t0 = Instant::now();
        // 10 kB every 100 ms for three seconds.
        for i in 0..30 {
            est.record_at(t0 + Duration::from_millis(100 * i), 10_000);
        }
        let bps = est.rate_at(t0 + Duration::from_millis(2900));
        assert!((90_000..=110_000).contains(&bps), "bps = {bps}");
    }

    #[test]
    fn rate_decays_when_stream_goes_quiet() {
        let mut est = ThroughputEstimator::with_window(Duration::from_secs(1));
        let t0 = Instant::now();
        est.record_at(t0, 5000);
        est.record_at(t0 + Duration::from_millis(500), 5000);
        assert_eq!(est.rate_at(t0 + Duration::from_millis(500)), 10_000);
        assert_eq!(est.rate_at(t0 + Duration::from_millis(1200)), 5000);
        assert_eq!(est.rate_at(t0 + Duration::from_secs(3)), 0);
    }

    #[test]
    fn gap_longer_than_window_clears_old_slots() {
        let mut est = ThroughputEstimator::with_window(Duration::from_secs(1));
        let t0 = Instant::now();
        est.record_at(t0, 1_000_000);
        let later = t0 + Duration::from_secs(5);
        est.record_at(later, 200);
        assert_eq!(est.rate_at(later), 200);
    }

    #[test]
    fn fps_from_regular_ticks() {
        let mut meter = FpsMeter::new(10);
        let t0 = Instant::now();
        for i in 0..11 {
            meter.tick_at(t0 + Duration::from_millis(100 * i));
        }
        let fps = meter.fps();
        assert!((9.5..=10.5).contains(&fps), "fps = {fps}");
    }

    #[test]
    fn fps_needs_two_ticks() {
        let mut meter = FpsMeter::new(10);
        assert_eq!(meter.fps(), 0.0);
        meter.tick();
        assert_eq!(meter.fps(), 0.0);
    }

    #[test]
    fn counters_snapshot() {
        let counters = HubCounters::default();
        HubCounters::bump(&counters.frames_submitted);
        HubCounters::add(&counters.bytes_sent, 42);
        let stats = counters.snapshot(3);
        assert_eq!(stats.frames_submitted, 1);
        assert_eq!(stats.bytes_sent, 42);
        assert_eq!(stats.frames_evicted, 3);
    }
}
