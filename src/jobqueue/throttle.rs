//! Level-triggered intake throttle for the in-memory backlog.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Backpressure valve over the in-memory queue. Purely level-triggered:
/// re-evaluated on every enqueue and pop against the backlog length, with no
/// hysteresis, so lengths oscillating near the threshold toggle state freely.
pub struct Throttle {
    threshold: usize,
    sleep: Duration,
    active: AtomicBool,
    events: AtomicU64,
    accumulated_ms: AtomicU64,
    since: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(threshold: usize, sleep_ms: u64) -> Self {
        Self {
            threshold,
            sleep: Duration::from_millis(sleep_ms),
            active: AtomicBool::new(false),
            events: AtomicU64::new(0),
            accumulated_ms: AtomicU64::new(0),
            since: Mutex::new(None),
        }
    }

    /// Re-evaluate against the current backlog length.
    pub fn evaluate(&self, backlog: usize) {
        if backlog >= self.threshold {
            if !self.active.swap(true, Ordering::AcqRel) {
                self.events.fetch_add(1, Ordering::Relaxed);
                *self.since.lock() = Some(Instant::now());
                warn!(
                    backlog = backlog,
                    threshold = self.threshold,
                    "Job intake throttled"
                );
            }
        } else if self.active.swap(false, Ordering::AcqRel) {
            if let Some(since) = self.since.lock().take() {
                self.accumulated_ms
                    .fetch_add(since.elapsed().as_millis() as u64, Ordering::Relaxed);
            }
            info!(backlog = backlog, "Job intake throttle released");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// How long a pump should sleep after an iteration, if at all.
    pub fn pause(&self) -> Option<Duration> {
        self.is_active().then_some(self.sleep)
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Cumulative throttled time, including the still-open span when active.
    pub fn throttled_ms_total(&self) -> u64 {
        let open = self
            .since
            .lock()
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.accumulated_ms.load(Ordering::Relaxed) + open
    }
}
