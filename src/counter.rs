//! Counter-based synchronization primitive for job completion tracking.
//!
//! A [`Counter`] holds the number of outstanding jobs tied to it. The scheduler
//! increments it when a job is submitted and decrements it when the job's
//! callable returns, so a waiter only has to check for zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A thread-safe outstanding-work counter.
///
/// Clones share the same underlying value, so a job descriptor and a waiter
/// can each hold a handle without borrowing across threads.
#[derive(Clone, Default)]
pub struct Counter {
    inner: Arc<AtomicUsize>,
}

impl Counter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a counter with the specified initial value.
    ///
    /// Useful when the caller decrements it by hand rather than tying it to
    /// submitted jobs.
    pub fn with_value(initial: usize) -> Self {
        Counter {
            inner: Arc::new(AtomicUsize::new(initial)),
        }
    }

    /// Increments the counter by one.
    pub fn increment(&self) {
        // SeqCst: the increment must be visible before the job is enqueued.
        self.inner.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrements the counter by one.
    ///
    /// Returns true if the counter reached zero.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero. More decrements than increments
    /// is a programming error.
    pub fn decrement(&self) -> bool {
        // Release so that everything the finished job wrote is visible to the
        // waiter that observes zero with Acquire.
        let previous = self.inner.fetch_sub(1, Ordering::Release);
        if previous == 0 {
            self.inner.store(0, Ordering::SeqCst);
            panic!("Counter decremented below zero");
        }
        previous == 1
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> usize {
        self.inner.load(Ordering::Acquire)
    }

    /// Checks if the counter has reached zero.
    pub fn is_zero(&self) -> bool {
        self.value() == 0
    }

    /// Returns true if both handles refer to the same counter.
    pub fn ptr_eq(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("value", &self.value())
            .finish()
    }
}
