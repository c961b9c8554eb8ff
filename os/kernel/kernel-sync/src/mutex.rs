//! Lock wrapper shared by the spinning and sleeping locks.

use crate::RawLock;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// Protects a `T` with the raw lock `R`.
///
/// The raw lock decides how a waiter passes the time (spinning for
/// [`SpinLock`](crate::SpinLock), yielding for
/// [`SleepMutex`](crate::SleepMutex)); the wrapper only ties the protected
/// value to a guard whose drop releases the lock.
pub struct Mutex<T, R> {
    raw: R,
    value: UnsafeCell<T>,
}

// Safety: the value is only reached through a guard, and at most one guard
// exists at a time.
unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    #[must_use]
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    #[must_use]
    pub const fn raw(&self) -> &R {
        &self.raw
    }
}

impl<T, R: RawLock> Mutex<T, R> {
    /// Wait for the lock and return a guard.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.acquire();
        MutexGuard { mutex: self }
    }

    /// Take the lock only if nobody holds it.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        self.raw.try_acquire().then(|| MutexGuard { mutex: self })
    }

    /// Run `f` on the protected value with the lock held.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.lock())
    }
}

/// Held lock; the lock is released when the guard drops, including while
/// unwinding.
#[must_use = "the lock is released as soon as the guard drops"]
pub struct MutexGuard<'a, T, R: RawLock> {
    mutex: &'a Mutex<T, R>,
}

impl<T, R: RawLock> Deref for MutexGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, R: RawLock> DerefMut for MutexGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T, R: RawLock> Drop for MutexGuard<'_, T, R> {
    fn drop(&mut self) {
        unsafe { self.mutex.raw.release() }
    }
}
