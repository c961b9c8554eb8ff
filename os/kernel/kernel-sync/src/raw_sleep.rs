use crate::context::{self, ThreadId};
use crate::RawLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

const NO_OWNER: ThreadId = usize::MAX;

/// A blocking lock that records its holder.
///
/// Waiters give up the CPU through the installed
/// [`ExecutionContext`](crate::context::ExecutionContext) instead of
/// busy-waiting. Acquiring from interrupt context or re-acquiring a lock the
/// caller already holds is a fatal error.
pub struct RawSleep {
    owner: AtomicUsize,
}

impl Default for RawSleep {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSleep {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    #[inline]
    fn try_claim(&self, me: ThreadId) -> bool {
        self.owner
            .compare_exchange(NO_OWNER, me, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn lock(&self) {
        assert!(
            !context::in_interrupt(),
            "sleeping lock acquired in interrupt context"
        );
        let ctx = context::current();
        let me = context::current_thread();
        // Without an installed context every caller shares one identity.
        if ctx.is_some() {
            assert!(!self.held_by(me), "sleeping lock acquired recursively");
        }

        while !self.try_claim(me) {
            match ctx {
                Some(ctx) => ctx.yield_now(),
                None => spin_loop(),
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        assert!(
            !context::in_interrupt(),
            "sleeping lock acquired in interrupt context"
        );
        self.try_claim(context::current_thread())
    }

    /// Releases the lock.
    ///
    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        debug_assert!(
            self.held_by_current(),
            "sleeping lock released by a thread that does not hold it"
        );
        self.owner.store(NO_OWNER, Ordering::Release);
    }

    #[inline]
    #[must_use]
    pub fn held_by(&self, thread: ThreadId) -> bool {
        self.owner.load(Ordering::Relaxed) == thread
    }

    /// Whether the running thread holds this lock.
    #[inline]
    #[must_use]
    pub fn held_by_current(&self) -> bool {
        self.held_by(context::current_thread())
    }
}

impl RawLock for RawSleep {
    fn acquire(&self) {
        self.lock();
    }

    fn try_acquire(&self) -> bool {
        self.try_lock()
    }

    unsafe fn release(&self) {
        unsafe { self.unlock() }
    }
}
