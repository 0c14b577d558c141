//! Bounded drop-oldest frame buffer.
//!
//! Sits between a producer (capture pipeline, relayed uploads) and the
//! broadcast loop. Producers never block: when the buffer is full the
//! oldest frame is evicted to make room, which keeps end-to-end latency
//! bounded when consumers fall behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::frame::Frame;

/// Default number of frames kept before the oldest is dropped.
pub const DEFAULT_BUFFER_CAPACITY: usize = 60;

/// Thread-safe FIFO of at most `capacity` frames.
///
/// Safe for any number of concurrent producers; [`pop_wait`](Self::pop_wait)
/// is intended for a single consumer.
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
    notify: Notify,
    evicted: AtomicU64,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            evicted: AtomicU64::new(0),
        }
    }

    /// Append a frame, evicting the oldest one if the buffer is full.
    ///
    /// Returns the evicted frame, if any.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let evicted = {
            let mut frames = self.frames.lock();
            let evicted = if frames.len() >= self.capacity {
                frames.pop_front()
            } else {
                None
            };
            frames.push_back(frame);
            evicted
        };

        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Remove and return the oldest frame, or `None` if empty.
    pub fn pop(&self) -> Option<Frame> {
        self.frames.lock().pop_front()
    }

    /// Wait up to `timeout` for a frame.
    ///
    /// Returns as soon as a frame is available; `None` means the timeout
    /// elapsed with the buffer still empty.
    pub async fn pop_wait(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pop() {
                return Some(frame);
            }
            // `notify_one` stores a permit when nobody is waiting, so a
            // push racing with the check above still wakes us.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.pop();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted to make room.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

// ── Tests ────────────────────────────────────────────────────────
