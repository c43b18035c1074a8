//! Scheduler configuration.

use crate::job::DEFAULT_STACK_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSmt,
}

impl PinningStrategy {
    /// Index of the logical processor worker `worker_id` should run on,
    /// given `num_cores` logical processors. `None` means leave it unpinned.
    pub fn core_for_worker(self, worker_id: usize, num_cores: usize) -> Option<usize> {
        if num_cores == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker_id % num_cores),
            PinningStrategy::AvoidSmt => {
                let physical = num_cores.div_ceil(2);
                Some((worker_id % physical) * 2)
            }
        }
    }
}

/// What `shutdown` does with work that is still queued or parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShutdownPolicy {
    /// Workers keep running until the ready queues, the waiting list and
    /// every in-flight resume are exhausted.
    #[default]
    Drain,
    /// Workers exit as soon as they observe the flag; queued and parked
    /// fibers are dropped.
    HardStop,
}

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 means one per hardware thread.
    pub num_threads: usize,
    /// Fiber stack size for jobs that do not request one. Default: 256KB.
    pub stack_size: usize,
    /// How workers are pinned to cores.
    pub pinning: PinningStrategy,
    /// Shutdown behaviour.
    pub shutdown: ShutdownPolicy,
    /// Longest an idle worker sleeps before re-checking the waiting list.
    pub idle_poll: Duration,
    /// Worker thread name prefix; the worker index is appended.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            stack_size: DEFAULT_STACK_SIZE,
            pinning: PinningStrategy::None,
            shutdown: ShutdownPolicy::Drain,
            idle_poll: Duration::from_millis(1),
            thread_name: "fibersched-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Self::default()
        }
    }

    pub fn pinning(mut self, pinning: PinningStrategy) -> Self {
        self.pinning = pinning;
        self
    }

    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// The worker count after resolving 0 to the hardware thread count.
    pub fn resolved_threads(&self) -> usize {
        if self.num_threads > 0 {
            self.num_threads
        } else {
            hardware_threads()
        }
    }
}

/// Number of hardware threads, falling back to 4 when it cannot be queried.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_mapping() {
        assert_eq!(PinningStrategy::None.core_for_worker(3, 8), None);
        assert_eq!(PinningStrategy::Linear.core_for_worker(3, 8), Some(3));
        assert_eq!(PinningStrategy::Linear.core_for_worker(9, 8), Some(1));
        assert_eq!(PinningStrategy::AvoidSmt.core_for_worker(0, 8), Some(0));
        assert_eq!(PinningStrategy::AvoidSmt.core_for_worker(3, 8), Some(6));
        assert_eq!(PinningStrategy::AvoidSmt.core_for_worker(4, 8), Some(0));
        assert_eq!(PinningStrategy::Linear.core_for_worker(0, 0), None);
    }

    #[test]
    fn test_resolved_threads() {
        assert_eq!(SchedulerConfig::with_threads(3).resolved_threads(), 3);
        assert!(SchedulerConfig::default().resolved_threads() >= 1);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "num_threads": 2, "shutdown": "HardStop" }"#).unwrap();
        assert_eq!(config.num_threads, 2);
        assert_eq!(config.shutdown, ShutdownPolicy::HardStop);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(config.pinning, PinningStrategy::None);
    }
}
