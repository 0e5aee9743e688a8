//! A word-sized spinlock for the core's side channels.
//!
//! The executor binding and the interrupt channel are touched for nanoseconds
//! at a time (a pointer copy, an `Option` swap), so a test-and-test-and-set
//! spinlock matches the cost of the critical sections better than a full
//! mutex. User code is never invoked while the lock is held.

use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// A value guarded by a single-word spinlock.
#[derive(Debug)]
pub(crate) struct MicroLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

impl<T> MicroLock<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is available.
    pub(crate) fn lock(&self) -> MicroLockGuard<'_, T> {
        // Acquire pairs with the Release store in the guard's drop, so the
        // new holder observes everything the previous holder wrote.
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait for the lock to look free before attempting the exchange
            // again, so contending threads spin on a shared read instead of
            // hammering the cache line with writes.
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }

        MicroLockGuard { lock: self }
    }
}

// SAFETY: The lock grants exclusive access to the value, one holder at a time,
// with the Acquire/Release pairing above ordering the accesses.
unsafe impl<T: Send> Send for MicroLock<T> {}
// SAFETY: As above - all shared access to the value goes through the lock.
unsafe impl<T: Send> Sync for MicroLock<T> {}

pub(crate) struct MicroLockGuard<'a, T> {
    lock: &'a MicroLock<T>,
}

impl<T> Deref for MicroLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The guard's existence proves we hold the lock, so we have
        // exclusive access to the value.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for MicroLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: As in `deref` - the guard proves exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for MicroLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
