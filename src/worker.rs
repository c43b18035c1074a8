//! Worker thread implementation.
//!
//! Worker threads repeatedly select the next runnable fiber from the shared
//! scheduler state and resume it. They form the foundation of the M:N
//! threading model, where many fibers are multiplexed onto a fixed number of
//! OS threads.

use crate::config::{PinningStrategy, SchedulerConfig};
use crate::fiber::{FiberState, Suspend};
use crate::metrics::Metrics;
use crate::scheduler::Shared;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// A worker thread that executes fibers.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Creates and starts a new worker thread.
    pub(crate) fn spawn(
        id: usize,
        shared: Arc<Shared>,
        config: &SchedulerConfig,
    ) -> std::io::Result<Self> {
        let pinning = config.pinning;
        let handle = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name, id))
            .spawn(move || {
                pin_current_thread(id, pinning);
                tracing::debug!(worker = id, "worker started");
                Worker::run_loop(id, &shared);
                tracing::debug!(worker = id, "worker exited");
            })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Main execution loop: select, resume, then finish or park.
    fn run_loop(id: usize, shared: &Shared) {
        while let Some(mut fiber) = shared.next_fiber() {
            Metrics::bump(&shared.metrics.fibers_resumed);

            let state = match panic::catch_unwind(AssertUnwindSafe(|| fiber.resume())) {
                Ok(state) => state,
                Err(payload) => {
                    tracing::error!(
                        worker = id,
                        panic = panic_message(&*payload),
                        "job panicked, terminating worker"
                    );
                    Metrics::bump(&shared.metrics.workers_panicked);
                    drop(fiber);
                    shared.finish_resume();
                    panic::resume_unwind(payload);
                }
            };

            match state {
                FiberState::Complete => {
                    Metrics::bump(&shared.metrics.jobs_completed);
                }
                FiberState::Suspended(Suspend::Yield) => {
                    Metrics::bump(&shared.metrics.yields);
                    shared.park(fiber, None);
                }
                FiberState::Suspended(Suspend::WaitFor(counter)) => {
                    Metrics::bump(&shared.metrics.waits_parked);
                    shared.park(fiber, Some(counter));
                }
            }
            shared.finish_resume();
        }
    }

    /// Returns the worker's ID.
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|handle| handle.thread().id())
    }

    /// Waits for the worker thread to finish.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// Pins the calling thread per `strategy`. Failure is logged and ignored.
fn pin_current_thread(worker_id: usize, strategy: PinningStrategy) {
    if strategy == PinningStrategy::None {
        return;
    }
    let Some(core_ids) = core_affinity::get_core_ids() else {
        tracing::warn!(worker = worker_id, "could not query core ids, worker left unpinned");
        return;
    };
    let Some(index) = strategy.core_for_worker(worker_id, core_ids.len()) else {
        return;
    };
    if !core_affinity::set_for_current(core_ids[index]) {
        tracing::warn!(worker = worker_id, core = index, "failed to pin worker to core");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "Unknown panic"
    }
}
