//! # fibersched - Fiber-Based Job Scheduler
//!
//! Distributes short-lived jobs across a fixed pool of OS worker threads.
//! Each job runs on its own stackful fiber, so it can suspend mid-execution
//! (to wait on a dependency or to yield) without blocking the thread under it.
//!
//! ## Architecture
//!
//! - **Jobs**: a closure plus a priority, an optional [`Counter`] and a stack size
//! - **Fibers**: suspendable execution contexts, one per job
//! - **Ready queues**: one global FIFO per priority (High, Normal, Low)
//! - **Waiting list**: fibers parked on a yield or on a counter
//! - **Workers**: OS threads that select and resume fibers; a fiber may
//!   resume on a different worker than the one it suspended on
//! - **Locks**: [`Mutex`] and [`AdaptiveMutex`], which suspend the job
//!   rather than the thread
//!
//! ## Example
//!
//! ```no_run
//! use fibersched::{Counter, JobDescriptor, Priority, Scheduler, this_job};
//!
//! let scheduler = Scheduler::new(4);
//! let handle = scheduler.handle();
//!
//! let done = Counter::new();
//! scheduler.schedule(JobDescriptor::with_counter(move || {
//!     let children = Counter::new();
//!     handle.schedule_all((0..8).map(|i| {
//!         JobDescriptor::with_counter(move || println!("child {i}"), children.clone())
//!             .priority(Priority::High)
//!     }));
//!     // Suspends this job only; the worker runs the children meanwhile.
//!     handle.wait_for_counter(&children);
//!     this_job::yield_now();
//! }, done.clone()));
//!
//! scheduler.wait_for_counter(&done);
//! scheduler.shutdown().expect("Shutdown failed");
//! ```

pub mod config;
pub mod counter;
pub mod error;
pub mod fiber;
pub mod job;
pub mod metrics;
pub mod scheduler;
pub mod sync;
pub mod this_job;
mod worker;

pub use config::{PinningStrategy, SchedulerConfig, ShutdownPolicy};
pub use counter::Counter;
pub use error::SchedulerError;
pub use job::{JobDescriptor, Priority};
pub use metrics::MetricsSnapshot;
pub use scheduler::{Scheduler, SchedulerHandle};
pub use sync::{AdaptiveMutex, AdaptiveMutexGuard, Mutex, MutexGuard};
