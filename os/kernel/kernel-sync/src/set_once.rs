//! Globals that are installed once during boot and read afterwards.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;

/// A slot that accepts exactly one value.
///
/// Readers never wait: until the writer has published its value,
/// [`get`](Self::get) reports the slot as empty.
pub struct SetOnce<T> {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<T>>,
}

// Safety: the slot is written by the single thread that won the EMPTY to
// WRITING transition and only read once SET is published.
unsafe impl<T: Send + Sync> Sync for SetOnce<T> {}

impl<T> Default for SetOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SetOnce<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The installed value, if any.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        (self.state.load(Ordering::Acquire) == SET)
            .then(|| unsafe { (*self.slot.get()).assume_init_ref() })
    }

    /// Install `value`.
    ///
    /// # Errors
    /// Hands `value` back if a value is already installed or another thread
    /// is installing one.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        unsafe { (*self.slot.get()).write(value) };
        self.state.store(SET, Ordering::Release);
        Ok(())
    }
}

impl<T> Drop for SetOnce<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SET {
            unsafe { self.slot.get_mut().assume_init_drop() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn second_set_hands_the_value_back() {
        let once = SetOnce::new();
        assert!(once.get().is_none());
        assert_eq!(once.set(1_u32), Ok(()));
        assert_eq!(once.set(2), Err(2));
        assert_eq!(once.get(), Some(&1));
    }

    #[test]
    fn exactly_one_racing_writer_wins() {
        let once = Arc::new(SetOnce::new());
        let winners: usize = (0..8)
            .map(|i| {
                let once = Arc::clone(&once);
                thread::spawn(move || usize::from(once.set(i).is_ok()))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 1);
        assert!(once.get().is_some());
    }

    #[test]
    fn installed_value_is_dropped_with_the_slot() {
        struct Counted<'a>(&'a AtomicUsize);
        impl Drop for Counted<'_> {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = AtomicUsize::new(0);
        let once = SetOnce::new();
        assert!(once.set(Counted(&drops)).is_ok());
        drop(once);
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        let _empty: SetOnce<Counted<'_>> = SetOnce::new();
    }
}
