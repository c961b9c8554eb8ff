//! # Execution context hook
//!
//! The synchronization layer needs two facts it cannot derive on its own: which
//! thread is running and whether the CPU is currently servicing an interrupt.
//! The thread subsystem provides both by installing an [`ExecutionContext`]
//! once during boot.
//!
//! Until a context is installed every caller is treated as the same anonymous
//! thread outside interrupt context, which matches the single-threaded early
//! boot environment.

use crate::SetOnce;
use core::hint::spin_loop;

/// Identifier the thread subsystem assigns to a kernel thread.
pub type ThreadId = usize;

/// Identity used for callers when no [`ExecutionContext`] is installed.
pub const ANONYMOUS_THREAD: ThreadId = usize::MAX - 1;

/// Services the thread subsystem provides to the lock implementations.
pub trait ExecutionContext: Sync {
    /// Identity of the running thread. Must be unique among live threads
    /// and never equal to [`ANONYMOUS_THREAD`] or `usize::MAX`.
    fn current_thread(&self) -> ThreadId;

    /// Whether the CPU is currently executing an interrupt handler.
    fn in_interrupt(&self) -> bool;

    /// Give up the CPU while waiting for a sleeping lock.
    fn yield_now(&self) {
        spin_loop();
    }
}

static CONTEXT: SetOnce<&'static dyn ExecutionContext> = SetOnce::new();

/// Installs the process-wide execution context.
///
/// # Errors
/// Returns the rejected context if one was already installed.
pub fn install(
    ctx: &'static dyn ExecutionContext,
) -> Result<(), &'static dyn ExecutionContext> {
    CONTEXT.set(ctx)
}

/// The installed execution context, if any.
#[inline]
pub fn current() -> Option<&'static dyn ExecutionContext> {
    CONTEXT.get().copied()
}

/// Identity of the running thread, or [`ANONYMOUS_THREAD`] before install.
#[inline]
#[must_use]
pub fn current_thread() -> ThreadId {
    current().map_or(ANONYMOUS_THREAD, |ctx| ctx.current_thread())
}

/// Whether the running code is an interrupt handler.
#[inline]
#[must_use]
pub fn in_interrupt() -> bool {
    current().is_some_and(|ctx| ctx.in_interrupt())
}
