//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: busy-waiting lock for the earliest boot paths that run
//!   before threads exist.
//! * [`SleepMutex`]: blocking lock that tracks its holder and refuses to be
//!   taken from interrupt context.
//! * [`IrqGuard`]: raises the interrupt priority level for a scope.
//! * [`SetOnce`]: global installed once during boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod context;
pub mod irq;
mod mutex;
mod raw_sleep;
mod set_once;
mod spin_lock;

pub use context::ExecutionContext;
pub use irq::{InterruptControl, IrqGuard};
pub use mutex::{Mutex, MutexGuard};
pub use raw_sleep::RawSleep;
pub use set_once::SetOnce;
pub use spin_lock::{RawSpin, SpinLock};

pub type SleepMutex<T> = Mutex<T, RawSleep>;

impl<T> SleepMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSleep::new(), value)
    }

    /// Whether the running thread currently holds this lock.
    #[inline]
    pub fn do_i_hold(&self) -> bool {
        self.raw().held_by_current()
    }
}

/// The locking half of a [`Mutex`]: decides how a waiter waits.
pub trait RawLock {
    /// Block until the lock is taken.
    fn acquire(&self);

    /// Take the lock if it is free; never waits.
    fn try_acquire(&self) -> bool;

    /// # Safety
    /// The caller must hold the lock.
    unsafe fn release(&self);
}
