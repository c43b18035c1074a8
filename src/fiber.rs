//! Fiber management and execution context.
//!
//! A [`Fiber`] wraps one job and runs it on a private stack using
//! `corosensei`, so the job can suspend mid-execution without blocking the
//! OS thread that resumed it.
//!
//! Fibers are not thread-affine: a fiber suspended on one worker may be
//! resumed on another. The only per-thread state is the "current yielder"
//! slot, which [`Fiber::resume`] rebinds on the executing thread before every
//! switch into the fiber and unbinds when control comes back.

use crate::counter::Counter;
use crate::job::{JobDescriptor, MIN_STACK_SIZE, Priority};
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Why a fiber handed control back to the scheduler before finishing.
#[derive(Debug)]
pub enum Suspend {
    /// Reschedule unconditionally (cooperative yield).
    Yield,
    /// Park until the counter reaches zero.
    WaitFor(Counter),
}

/// Outcome of one [`Fiber::resume`] call.
#[derive(Debug)]
pub enum FiberState {
    Suspended(Suspend),
    Complete,
}

type JobYielder = Yielder<(), Suspend>;
type JobCoroutine = Coroutine<(), Suspend, (), DefaultStack>;

thread_local! {
    static CURRENT_YIELDER: Cell<*const JobYielder> = const { Cell::new(ptr::null()) };
}

// The accessors below are never inlined so the compiler cannot cache the
// thread-local address across a suspension point: after `suspend` returns
// the fiber may be running on a different OS thread.
#[inline(never)]
fn current_yielder() -> *const JobYielder {
    CURRENT_YIELDER.with(|slot| slot.get())
}

#[inline(never)]
fn swap_current_yielder(yielder: *const JobYielder) -> *const JobYielder {
    CURRENT_YIELDER.with(|slot| slot.replace(yielder))
}

/// Restores the previous binding even if the job panics.
struct YielderBinding {
    previous: *const JobYielder,
    slot: *mut *const JobYielder,
}

impl Drop for YielderBinding {
    fn drop(&mut self) {
        let inner = swap_current_yielder(self.previous);
        // SAFETY: `slot` points at the owning fiber's field, which outlives
        // the binding (the binding lives on the resume call's stack frame).
        unsafe { *self.slot = inner };
    }
}

/// A lightweight stackful execution context running one job.
pub struct Fiber {
    /// Job body, moved into the coroutine on first resume.
    work: Option<Box<dyn FnOnce() + Send + 'static>>,
    counter: Option<Counter>,
    priority: Priority,
    stack_size: usize,

    /// Created lazily so queued jobs do not hold a stack.
    coroutine: Option<JobCoroutine>,

    /// The coroutine's yielder, captured from the thread-local slot when the
    /// fiber last suspended. Null until the first resume.
    yielder: *const JobYielder,

    /// False only while the fiber is parked waiting on a counter.
    ready: AtomicBool,
}

// SAFETY: the job closure is `Send`, and a fiber is owned by exactly one
// container or worker at a time. The coroutine's thread-local usage is
// limited to the yielder slot, which is rebound on every resume.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Wraps a job descriptor. No stack is allocated until the first resume.
    pub fn new(job: JobDescriptor, default_stack_size: usize) -> Self {
        let priority = job.priority_class();
        let stack_size = job
            .requested_stack_size()
            .unwrap_or(default_stack_size)
            .max(MIN_STACK_SIZE);
        let (work, counter) = job.into_parts();

        Fiber {
            work: Some(work),
            counter,
            priority,
            stack_size,
            coroutine: None,
            yielder: ptr::null(),
            ready: AtomicBool::new(true),
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// True once the fiber has been resumed at least once.
    pub fn is_started(&self) -> bool {
        self.coroutine.is_some()
    }

    /// True when resuming the fiber needs no dependency check.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// True once the job body has returned.
    pub fn is_finished(&self) -> bool {
        self.work.is_none() && self.coroutine.as_ref().is_none_or(|c| c.done())
    }

    fn start(&mut self) {
        let Some(work) = self.work.take() else {
            return;
        };

        let stack = match DefaultStack::new(self.stack_size) {
            Ok(stack) => stack,
            Err(err) => {
                tracing::error!(stack_size = self.stack_size, %err, "failed to allocate fiber stack");
                std::process::abort();
            }
        };

        self.coroutine = Some(Coroutine::with_stack(
            stack,
            move |yielder: &JobYielder, ()| {
                swap_current_yielder(yielder as *const _);
                work();
            },
        ));
    }

    /// Starts or continues the job on the calling OS thread.
    ///
    /// Returns when the job finishes or suspends. On completion the job's
    /// counter, if any, is decremented. A panic in the job propagates out of
    /// this call and the counter is left untouched.
    pub fn resume(&mut self) -> FiberState {
        if self.coroutine.is_none() {
            self.start();
        }
        self.ready.store(true, Ordering::Release);

        let result = {
            let previous = swap_current_yielder(self.yielder);
            let _binding = YielderBinding {
                previous,
                slot: &mut self.yielder,
            };
            match self.coroutine.as_mut() {
                Some(coroutine) if !coroutine.done() => coroutine.resume(()),
                _ => CoroutineResult::Return(()),
            }
        };

        match result {
            CoroutineResult::Yield(reason) => {
                if matches!(reason, Suspend::WaitFor(_)) {
                    self.ready.store(false, Ordering::Release);
                }
                FiberState::Suspended(reason)
            }
            CoroutineResult::Return(()) => {
                if let Some(counter) = self.counter.take() {
                    counter.decrement();
                }
                FiberState::Complete
            }
        }
    }

    /// Suspends the fiber running on this thread.
    ///
    /// Returns false (without suspending) when the caller is not a fiber.
    pub(crate) fn suspend_current(reason: Suspend) -> bool {
        let yielder = current_yielder();
        if yielder.is_null() {
            return false;
        }
        // SAFETY: a non-null slot is only ever set by the coroutine body of
        // the fiber currently executing on this thread, and a yielder lives
        // as long as its coroutine.
        unsafe { (*yielder).suspend(reason) };
        true
    }

    /// True if the calling code is running inside a fiber.
    pub fn in_fiber() -> bool {
        !current_yielder().is_null()
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("priority", &self.priority)
            .field("stack_size", &self.stack_size)
            .field("started", &self.is_started())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_to_completion_and_decrements() {
        let counter = Counter::new();
        counter.increment();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        let mut fiber = Fiber::new(
            JobDescriptor::with_counter(
                move || {
                    ran_clone.fetch_add(1, Ordering::SeqCst);
                },
                counter.clone(),
            ),
            64 * 1024,
        );
        assert!(!fiber.is_started());
        assert!(fiber.is_ready());

        assert!(matches!(fiber.resume(), FiberState::Complete));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(counter.is_zero());
        assert!(fiber.is_finished());
    }

    #[test]
    fn test_yield_and_resume_continues_where_it_left_off() {
        let steps = Arc::new(AtomicUsize::new(0));
        let steps_clone = steps.clone();

        let mut fiber = Fiber::new(
            JobDescriptor::new(move || {
                steps_clone.store(1, Ordering::SeqCst);
                assert!(Fiber::suspend_current(Suspend::Yield));
                steps_clone.store(2, Ordering::SeqCst);
            }),
            64 * 1024,
        );

        assert!(matches!(fiber.resume(), FiberState::Suspended(Suspend::Yield)));
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(fiber.is_ready());
        assert!(!Fiber::in_fiber());

        assert!(matches!(fiber.resume(), FiberState::Complete));
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wait_clears_ready_flag() {
        let dependency = Counter::with_value(1);
        let dep_clone = dependency.clone();

        let mut fiber = Fiber::new(
            JobDescriptor::new(move || {
                Fiber::suspend_current(Suspend::WaitFor(dep_clone));
            }),
            64 * 1024,
        );

        match fiber.resume() {
            FiberState::Suspended(Suspend::WaitFor(c)) => assert!(c.ptr_eq(&dependency)),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(!fiber.is_ready());

        assert!(matches!(fiber.resume(), FiberState::Complete));
        assert!(fiber.is_ready());
    }

    #[test]
    fn test_resume_on_another_thread() {
        let threads = Arc::new(std::sync::Mutex::new(Vec::new()));
        let threads_clone = threads.clone();

        let mut fiber = Fiber::new(
            JobDescriptor::new(move || {
                threads_clone.lock().unwrap().push(std::thread::current().id());
                Fiber::suspend_current(Suspend::Yield);
                threads_clone.lock().unwrap().push(std::thread::current().id());
            }),
            64 * 1024,
        );

        assert!(matches!(fiber.resume(), FiberState::Suspended(_)));
        let fiber = std::thread::spawn(move || {
            assert!(matches!(fiber.resume(), FiberState::Complete));
            fiber
        })
        .join()
        .unwrap();
        assert!(fiber.is_finished());

        let threads = threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert_ne!(threads[0], threads[1]);
    }

    #[test]
    fn test_suspend_outside_fiber_is_noop() {
        assert!(!Fiber::in_fiber());
        assert!(!Fiber::suspend_current(Suspend::Yield));
    }

    #[test]
    fn test_stack_size_clamped() {
        let fiber = Fiber::new(JobDescriptor::new(|| {}).stack_size(1), 64 * 1024);
        assert_eq!(fiber.stack_size(), MIN_STACK_SIZE);
        let fiber = Fiber::new(JobDescriptor::new(|| {}), 64 * 1024);
        assert_eq!(fiber.stack_size(), 64 * 1024);
    }
}
