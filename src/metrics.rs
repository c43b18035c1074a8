use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Runtime counters for the scheduler.
///
/// All fields are updated with relaxed ordering; a snapshot is a best-effort
/// view, not a consistent cut.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs accepted by `schedule`/`schedule_all`.
    pub jobs_scheduled: AtomicU64,
    /// Jobs whose body returned.
    pub jobs_completed: AtomicU64,
    /// Calls into `Fiber::resume` made by workers.
    pub fibers_resumed: AtomicU64,
    /// Fibers parked by `yield_now`.
    pub yields: AtomicU64,
    /// Fibers parked by `wait_for` on a non-zero counter.
    pub waits_parked: AtomicU64,
    /// `wait_for` calls that returned without suspending.
    pub waits_fast_path: AtomicU64,
    /// Workers that terminated because a job panicked.
    pub workers_panicked: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_scheduled: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            fibers_resumed: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            waits_parked: AtomicU64::new(0),
            waits_fast_path: AtomicU64::new(0),
            workers_panicked: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub(crate) fn bump(field: &AtomicU64) {
        field.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    ///
    /// `pending_waits` is filled in by the scheduler, which owns the list.
    pub fn snapshot(&self, pending_waits: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_scheduled: self.jobs_scheduled.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            fibers_resumed: self.fibers_resumed.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            waits_parked: self.waits_parked.load(Ordering::Relaxed),
            waits_fast_path: self.waits_fast_path.load(Ordering::Relaxed),
            workers_panicked: self.workers_panicked.load(Ordering::Relaxed),
            pending_waits,
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub jobs_scheduled: u64,
    pub jobs_completed: u64,
    pub fibers_resumed: u64,
    pub yields: u64,
    pub waits_parked: u64,
    pub waits_fast_path: u64,
    pub workers_panicked: u64,
    /// Entries currently on the waiting list.
    pub pending_waits: usize,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_completed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Jobs submitted but not yet finished.
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_scheduled.saturating_sub(self.jobs_completed)
    }
}
