//! The scheduler: ready queues, waiting list and worker pool.
//!
//! [`Scheduler`] owns the worker threads and is the only type that can shut
//! them down. [`SchedulerHandle`] is a cheap clone of the shared state that
//! jobs capture to submit nested work or wait on counters.
//!
//! Locking: `ready` guards the three priority queues and is the mutex the
//! condition variable waits on; `waiting` guards the parked fibers. When both
//! are held, `ready` is always taken first.

use crate::config::{SchedulerConfig, ShutdownPolicy};
use crate::counter::Counter;
use crate::error::{Result, SchedulerError};
use crate::fiber::Fiber;
use crate::job::{JobDescriptor, Priority};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::this_job;
use crate::worker::Worker;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Panics never unwind while a scheduler lock is held, so a poisoned lock
/// still guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A suspended fiber parked until its counter reaches zero, or until it is
/// picked again after a plain yield when `counter` is `None`.
pub(crate) struct WaitingContext {
    fiber: Box<Fiber>,
    counter: Option<Counter>,
    /// Dispatch epoch when the fiber yielded.
    parked_epoch: u64,
}

impl WaitingContext {
    fn is_runnable(&self, dispatch_epoch: u64, queues_empty: bool) -> bool {
        match &self.counter {
            Some(counter) => counter.is_zero(),
            // A yielded fiber gives queued work one dispatch before it is
            // preferred again, so a yield loop cannot starve the queues.
            None => queues_empty || self.parked_epoch < dispatch_epoch,
        }
    }
}

#[derive(Default)]
struct ReadyQueues {
    /// Indexed by `Priority::index`, highest first.
    levels: [VecDeque<Box<Fiber>>; 3],
}

impl ReadyQueues {
    fn push(&mut self, fiber: Box<Fiber>) {
        self.levels[fiber.priority().index()].push_back(fiber);
    }

    fn pop(&mut self) -> Option<Box<Fiber>> {
        self.levels.iter_mut().find_map(|queue| queue.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    fn len_at(&self, priority: Priority) -> usize {
        self.levels[priority.index()].len()
    }
}

/// State shared by the owner, every handle and every worker.
pub(crate) struct Shared {
    ready: Mutex<ReadyQueues>,
    waiting: Mutex<VecDeque<WaitingContext>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    /// Fibers popped by a worker and not yet finished or parked.
    in_flight: AtomicUsize,
    /// Number of fibers taken from the ready queues; written under `ready`.
    dispatch_epoch: AtomicU64,
    stack_size: usize,
    policy: ShutdownPolicy,
    idle_poll: Duration,
    num_workers: usize,
    pub(crate) metrics: Metrics,
}

impl Shared {
    fn new(config: &SchedulerConfig, num_workers: usize) -> Self {
        Shared {
            ready: Mutex::new(ReadyQueues::default()),
            waiting: Mutex::new(VecDeque::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            dispatch_epoch: AtomicU64::new(0),
            stack_size: config.stack_size,
            policy: config.shutdown,
            idle_poll: config.idle_poll,
            num_workers,
            metrics: Metrics::new(),
        }
    }

    fn push(&self, fiber: Box<Fiber>) {
        lock(&self.ready).push(fiber);
        self.wakeup.notify_one();
    }

    fn push_all(&self, fibers: Vec<Box<Fiber>>) {
        {
            let mut ready = lock(&self.ready);
            for fiber in fibers {
                ready.push(fiber);
            }
        }
        self.wakeup.notify_all();
    }

    /// Removes the first runnable entry from the waiting list.
    fn take_runnable_waiter(&self, queues_empty: bool) -> Option<Box<Fiber>> {
        let mut waiting = lock(&self.waiting);
        let epoch = self.dispatch_epoch.load(Ordering::Acquire);
        let index = waiting
            .iter()
            .position(|entry| entry.is_runnable(epoch, queues_empty))?;
        waiting.remove(index).map(|entry| entry.fiber)
    }

    fn is_drained(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0 && lock(&self.waiting).is_empty()
    }

    /// Blocks until a fiber is runnable or the worker should exit.
    ///
    /// Selection order: satisfied waiters, then High, Normal and Low queues.
    pub(crate) fn next_fiber(&self) -> Option<Box<Fiber>> {
        let mut ready = lock(&self.ready);
        loop {
            let stopping = self.shutdown.load(Ordering::Acquire);
            if stopping && self.policy == ShutdownPolicy::HardStop {
                return None;
            }

            let fiber = self
                .take_runnable_waiter(ready.is_empty())
                .or_else(|| {
                    let fiber = ready.pop()?;
                    self.dispatch_epoch.fetch_add(1, Ordering::AcqRel);
                    Some(fiber)
                });
            if let Some(fiber) = fiber {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                return Some(fiber);
            }

            if stopping && self.is_drained() {
                return None;
            }

            ready = self
                .wakeup
                .wait_timeout(ready, self.idle_poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Puts a suspended fiber on the waiting list.
    pub(crate) fn park(&self, fiber: Box<Fiber>, counter: Option<Counter>) {
        let parked_epoch = self.dispatch_epoch.load(Ordering::Acquire);
        lock(&self.waiting).push_back(WaitingContext {
            fiber,
            counter,
            parked_epoch,
        });
        // Taking `ready` orders this push before any idle worker's re-check.
        let _ready = lock(&self.ready);
        self.wakeup.notify_one();
    }

    /// Called by a worker once the fiber it resumed has finished or parked.
    pub(crate) fn finish_resume(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if self.shutdown.load(Ordering::Acquire) {
            let _ready = lock(&self.ready);
            self.wakeup.notify_all();
        }
    }

    fn request_shutdown(&self) {
        let _ready = lock(&self.ready);
        self.shutdown.store(true, Ordering::Release);
        self.wakeup.notify_all();
    }

    /// Drops whatever is left once every worker has exited.
    fn discard_remaining(&self) -> usize {
        let ready = std::mem::take(&mut *lock(&self.ready));
        let waiting = std::mem::take(&mut *lock(&self.waiting));
        let discarded = ready.len() + waiting.len();
        if discarded > 0 {
            tracing::warn!(
                queued = ready.len(),
                parked = waiting.len(),
                "discarding unfinished jobs at shutdown"
            );
        }
        // Dropped outside the locks: unwinding a suspended fiber runs the
        // job's destructors, which may call back into the scheduler.
        drop(ready);
        drop(waiting);
        discarded
    }
}

/// Cloneable submission handle.
///
/// Jobs capture a handle to schedule nested work and wait on counters. A
/// handle does not keep the workers alive; submitting after the owning
/// [`Scheduler`] has shut down queues work that never runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Submits one job.
    ///
    /// The job's counter, if any, is incremented before the job becomes
    /// visible to any worker.
    pub fn schedule(&self, job: JobDescriptor) {
        if let Some(counter) = job.counter_ref() {
            counter.increment();
        }
        let fiber = Box::new(Fiber::new(job, self.shared.stack_size));
        Metrics::bump(&self.shared.metrics.jobs_scheduled);
        self.shared.push(fiber);
    }

    /// Submits a batch of jobs under one lock acquisition and wakes every
    /// idle worker.
    pub fn schedule_all<I>(&self, jobs: I)
    where
        I: IntoIterator<Item = JobDescriptor>,
    {
        let fibers: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                if let Some(counter) = job.counter_ref() {
                    counter.increment();
                }
                Box::new(Fiber::new(job, self.shared.stack_size))
            })
            .collect();
        if fibers.is_empty() {
            return;
        }
        self.shared
            .metrics
            .jobs_scheduled
            .fetch_add(fibers.len() as u64, Ordering::Relaxed);
        self.shared.push_all(fibers);
    }

    /// Submits a normal-priority closure and returns a counter tracking it.
    pub fn run<F>(&self, work: F) -> Counter
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_priority(Priority::Normal, work)
    }

    /// Submits a closure with a specific priority.
    pub fn run_priority<F>(&self, priority: Priority, work: F) -> Counter
    where
        F: FnOnce() + Send + 'static,
    {
        let counter = Counter::new();
        self.schedule(JobDescriptor::with_counter(work, counter.clone()).priority(priority));
        counter
    }

    /// Submits multiple closures and returns a counter tracking all of them.
    pub fn run_multiple<I>(&self, jobs: I) -> Counter
    where
        I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
    {
        let counter = Counter::new();
        self.schedule_all(
            jobs.into_iter()
                .map(|work| JobDescriptor::with_counter(work, counter.clone())),
        );
        counter
    }

    /// Waits for a counter to reach zero.
    ///
    /// Returns immediately, without parking anything, if it already is.
    /// Inside a job the fiber is suspended and the worker moves on to other
    /// work; on a plain thread the caller blocks.
    pub fn wait_for_counter(&self, counter: &Counter) {
        if counter.is_zero() {
            Metrics::bump(&self.shared.metrics.waits_fast_path);
            return;
        }
        this_job::wait_for(counter);
    }

    /// Returns the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.shared.num_workers
    }

    /// Number of fibers currently sitting in the ready queues.
    pub fn queued_jobs(&self) -> usize {
        lock(&self.shared.ready).len()
    }

    /// Number of fibers queued at one priority level.
    pub fn queued_at(&self, priority: Priority) -> usize {
        lock(&self.shared.ready).len_at(priority)
    }

    /// Number of fibers on the waiting list.
    pub fn pending_waits(&self) -> usize {
        lock(&self.shared.waiting).len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot(self.pending_waits())
    }
}

/// The fiber scheduler managing worker threads and job execution.
///
/// # Example
///
/// ```no_run
/// use fibersched::{Counter, JobDescriptor, Scheduler};
///
/// let scheduler = Scheduler::new(4);
/// let counter = Counter::new();
/// scheduler.schedule(JobDescriptor::with_counter(|| println!("hello"), counter.clone()));
/// scheduler.wait_for_counter(&counter);
/// scheduler.shutdown().expect("Shutdown failed");
/// ```
pub struct Scheduler {
    handle: SchedulerHandle,
    workers: Vec<Worker>,
    policy: ShutdownPolicy,
}

impl Scheduler {
    /// Creates a scheduler with `num_threads` workers (0 = one per hardware
    /// thread) and default configuration.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread cannot be spawned.
    pub fn new(num_threads: usize) -> Self {
        Self::with_config(SchedulerConfig::with_threads(num_threads))
            .unwrap_or_else(|err| panic!("failed to start scheduler: {err}"))
    }

    /// Creates a scheduler with one worker per hardware thread.
    pub fn with_default_threads() -> Self {
        Self::new(0)
    }

    /// Creates a scheduler from an explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        let num_workers = config.resolved_threads();
        let shared = Arc::new(Shared::new(&config, num_workers));

        let mut scheduler = Scheduler {
            handle: SchedulerHandle {
                shared: Arc::clone(&shared),
            },
            workers: Vec::with_capacity(num_workers),
            policy: config.shutdown,
        };

        for id in 0..num_workers {
            match Worker::spawn(id, Arc::clone(&shared), &config) {
                Ok(worker) => scheduler.workers.push(worker),
                Err(source) => {
                    // Joins the workers that did start.
                    scheduler.stop_logged("scheduler startup aborted with failed workers");
                    return Err(SchedulerError::Spawn { worker: id, source });
                }
            }
        }

        tracing::debug!(
            workers = num_workers,
            stack_size = config.stack_size,
            pinning = ?config.pinning,
            policy = ?config.shutdown,
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// Returns a cloneable handle for use inside jobs.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn schedule(&self, job: JobDescriptor) {
        self.handle.schedule(job);
    }

    pub fn schedule_all<I>(&self, jobs: I)
    where
        I: IntoIterator<Item = JobDescriptor>,
    {
        self.handle.schedule_all(jobs);
    }

    pub fn run<F>(&self, work: F) -> Counter
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run(work)
    }

    pub fn run_priority<F>(&self, priority: Priority, work: F) -> Counter
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.run_priority(priority, work)
    }

    pub fn run_multiple<I>(&self, jobs: I) -> Counter
    where
        I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
    {
        self.handle.run_multiple(jobs)
    }

    pub fn wait_for_counter(&self, counter: &Counter) {
        self.handle.wait_for_counter(counter);
    }

    pub fn num_workers(&self) -> usize {
        self.handle.num_workers()
    }

    pub fn pending_waits(&self) -> usize {
        self.handle.pending_waits()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.handle.metrics()
    }

    /// Stops the workers according to the configured [`ShutdownPolicy`] and
    /// joins them.
    ///
    /// Returns an error if any worker thread terminated because a job
    /// panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    /// Stops the workers where no caller can receive the result.
    fn stop_logged(&mut self, context: &'static str) {
        if let Err(err) = self.stop() {
            tracing::error!(%err, "{context}");
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.workers.is_empty() {
            return Ok(());
        }
        tracing::info!(policy = ?self.policy, workers = self.workers.len(), "shutting down scheduler");

        let shared = &self.handle.shared;
        shared.request_shutdown();

        let current = std::thread::current().id();
        let mut failed = 0;
        for worker in self.workers.drain(..) {
            if worker.thread_id() == Some(current) {
                tracing::error!(worker = worker.id(), "scheduler stopped from its own worker; not joining it");
                continue;
            }
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed += 1;
                tracing::error!(worker = worker_id, "worker panicked during execution");
            }
        }

        shared.discard_remaining();

        if failed > 0 {
            Err(SchedulerError::WorkerPanicked { count: failed })
        } else {
            Ok(())
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::with_default_threads()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_logged("scheduler dropped with failed workers");
    }
}
