//! Cooperative primitives for code running inside a job.
//!
//! Every function here suspends only the calling fiber, never the worker
//! thread. Called from a plain OS thread they fall back to the blocking
//! std equivalent.

use crate::counter::Counter;
use crate::fiber::{Fiber, Suspend};
use std::thread;
use std::time::{Duration, Instant};

/// Yields execution to allow other work to run.
///
/// Inside a job the fiber is parked and will be resumed by some worker,
/// possibly a different one. Outside a job this is `std::thread::yield_now`.
pub fn yield_now() {
    if !Fiber::suspend_current(Suspend::Yield) {
        thread::yield_now();
    }
}

/// True when called from a job body running on a scheduler worker.
pub fn is_in_job() -> bool {
    Fiber::in_fiber()
}

/// Yields repeatedly until `duration` has elapsed.
pub fn sleep_for(duration: Duration) {
    if !is_in_job() {
        thread::sleep(duration);
        return;
    }
    match Instant::now().checked_add(duration) {
        Some(deadline) => sleep_until(deadline),
        None => loop {
            yield_now();
        },
    }
}

/// Yields repeatedly until `deadline`. A deadline in the past returns
/// immediately.
pub fn sleep_until(deadline: Instant) {
    if !is_in_job() {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        return;
    }
    while Instant::now() < deadline {
        yield_now();
    }
}

/// Waits for `counter` to reach zero.
///
/// Inside a job the fiber is parked on the waiting list and resumed once a
/// worker observes the counter at zero. On a plain thread the caller sleeps
/// with exponential back-off.
pub fn wait_for(counter: &Counter) {
    if counter.is_zero() {
        return;
    }

    if is_in_job() {
        while !counter.is_zero() {
            Fiber::suspend_current(Suspend::WaitFor(counter.clone()));
        }
        return;
    }

    let mut backoff_us = 1;
    const MAX_BACKOFF_US: u64 = 1000;

    while !counter.is_zero() {
        thread::sleep(Duration::from_micros(backoff_us));
        backoff_us = (backoff_us * 2).min(MAX_BACKOFF_US);
    }
}
