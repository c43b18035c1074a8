//! Fiber-aware locks.
//!
//! Neither lock blocks the OS thread: contention suspends only the calling
//! job via [`this_job::yield_now`], so the worker goes on to run other ready
//! work. Both are meant for use inside jobs; on a plain thread the yield
//! degrades to `std::thread::yield_now` and they behave as spin locks.

use crate::this_job;
use crossbeam::utils::Backoff;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// The lock word shared by both mutexes.
struct RawLock {
    locked: AtomicBool,
}

impl RawLock {
    const fn new() -> Self {
        RawLock {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    #[inline]
    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// A mutual exclusion lock that yields the calling job between attempts.
pub struct Mutex<T: ?Sized> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Mutex {
            raw: RawLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, yielding the current job while it is contended.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        while !self.raw.try_acquire() {
            this_job::yield_now();
        }
        MutexGuard::new(self)
    }

    /// Attempts to acquire the lock without suspending.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.raw
            .try_acquire()
            .then(|| MutexGuard::new(self))
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Releases the [`Mutex`] when dropped.
///
/// The guard hands out `&T`, so sharing it across threads requires
/// `T: Sync`:
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<fibersched::sync::MutexGuard<'static, std::cell::Cell<i32>>>();
/// ```
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    lock: &'a Mutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    fn new(lock: &'a Mutex<T>) -> Self {
        MutexGuard {
            lock,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held exclusively.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

/// A lock that busy-waits on the OS thread for a bounded time before falling
/// back to yielding the job.
///
/// Suited to locks held for a few instructions, where a short spin is
/// cheaper than a trip through the scheduler.
pub struct AdaptiveMutex<T: ?Sized> {
    raw: RawLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: ?Sized + Send> Send for AdaptiveMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for AdaptiveMutex<T> {}

impl<T> AdaptiveMutex<T> {
    pub const fn new(value: T) -> Self {
        AdaptiveMutex {
            raw: RawLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> AdaptiveMutex<T> {
    /// Acquires the lock, spinning for at most `spin_for` before yielding
    /// the current job between attempts.
    pub fn lock(&self, spin_for: Duration) -> AdaptiveMutexGuard<'_, T> {
        if self.raw.try_acquire() {
            return AdaptiveMutexGuard::new(self);
        }

        let start = Instant::now();
        let backoff = Backoff::new();
        while start.elapsed() < spin_for {
            if !self.raw.is_locked() && self.raw.try_acquire() {
                return AdaptiveMutexGuard::new(self);
            }
            backoff.spin();
        }

        while !self.raw.try_acquire() {
            this_job::yield_now();
        }
        AdaptiveMutexGuard::new(self)
    }

    /// Attempts to acquire the lock without spinning or suspending.
    pub fn try_lock(&self) -> Option<AdaptiveMutexGuard<'_, T>> {
        self.raw
            .try_acquire()
            .then(|| AdaptiveMutexGuard::new(self))
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for AdaptiveMutex<T> {
    fn default() -> Self {
        AdaptiveMutex::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for AdaptiveMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Releases the [`AdaptiveMutex`] when dropped.
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<fibersched::sync::AdaptiveMutexGuard<'static, std::cell::Cell<i32>>>();
/// ```
#[must_use = "if unused the AdaptiveMutex will immediately unlock"]
pub struct AdaptiveMutexGuard<'a, T: ?Sized> {
    lock: &'a AdaptiveMutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> AdaptiveMutexGuard<'a, T> {
    fn new(lock: &'a AdaptiveMutex<T>) -> Self {
        AdaptiveMutexGuard {
            lock,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for AdaptiveMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for AdaptiveMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held exclusively.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for AdaptiveMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}
