//! Host-thread execution context for unit tests.

pub use kernel_vmem::test_support::TestPhys;

use kernel_sync::context::{self, ExecutionContext, ThreadId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

static NEXT_THREAD: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_ID: ThreadId = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

struct HostThreads;

impl ExecutionContext for HostThreads {
    fn current_thread(&self) -> ThreadId {
        THREAD_ID.with(|id| *id)
    }

    fn in_interrupt(&self) -> bool {
        false
    }

    fn yield_now(&self) {
        thread::yield_now();
    }
}

static HOST: HostThreads = HostThreads;

/// Give every host thread its own id so sleeping-lock holder checks run.
pub fn install_host_threads() {
    let _ = context::install(&HOST);
}
