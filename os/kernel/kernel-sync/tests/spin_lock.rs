use kernel_sync::SpinLock;
use std::sync::{Arc, Barrier};
use std::{panic, thread};

/// A bump cursor over a range of frame numbers, the shape of state the
/// early-boot paths keep behind a spin lock.
struct Bump {
    next: u32,
    end: u32,
}

impl Bump {
    fn take(&mut self, n: u32) -> Option<u32> {
        let base = self.next;
        let end = base.checked_add(n)?;
        if end > self.end {
            return None;
        }
        self.next = end;
        Some(base)
    }
}

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.try_lock().is_none());
    }
    *l.lock() += 1;
    assert_eq!(l.with_lock(|v| *v), 42);
}

#[test]
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);
    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());
    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn failed_try_lock_leaves_the_holder_in_place() {
    let l = SpinLock::new(Bump { next: 3, end: 4 });
    let mut held = l.lock();
    assert!(l.try_lock().is_none());
    assert_eq!(held.take(1), Some(3));
    drop(held);
    assert_eq!(l.with_lock(|b| b.take(1)), None);
}

#[test]
fn concurrent_bump_hands_out_disjoint_ranges() {
    let threads = 8;
    let per_thread = 200;

    let lock = Arc::new(SpinLock::new(Bump {
        next: 0,
        end: threads * per_thread,
    }));
    let start = Arc::new(Barrier::new(threads as usize));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..per_thread)
                    .map(|_| lock.with_lock(|b| b.take(1)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<u32> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len(), (threads * per_thread) as usize);
    assert_eq!(lock.with_lock(|b| b.take(1)), None);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");
    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn spinlock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let l = SpinLock::new(Bump { next: 0, end: 1 });
    takes_sync(&l);
}
