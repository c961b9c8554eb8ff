//! Busy-waiting lock for the paths that run before threads exist.

use crate::RawLock;
use crate::mutex::Mutex;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Spinning lock.
///
/// Only guards state touched before the thread subsystem is up, such as the
/// RAM stealer that feeds page allocations until the coremap is
/// bootstrapped. Everything else takes a [`SleepMutex`](crate::SleepMutex).
pub type SpinLock<T> = Mutex<T, RawSpin>;

impl<T> SpinLock<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

/// Raw spinning lock: a flag taken with compare-and-swap.
pub struct RawSpin {
    taken: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            taken: AtomicBool::new(false),
        }
    }
}

impl RawLock for RawSpin {
    fn acquire(&self) {
        while self
            .taken
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Wait on plain loads so the cache line stays shared.
            while self.taken.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.taken
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn release(&self) {
        debug_assert!(
            self.taken.load(Ordering::Relaxed),
            "spin lock released while free"
        );
        self.taken.store(false, Ordering::Release);
    }
}
