//! Bump allocator that serves kernel pages before the coremap exists.
//! Stolen memory is never returned; bootstrap marks it FIXED.

use crate::coremap::RamLayout;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

pub struct RamStealer {
    next: PhysicalAddress,
    end: PhysicalAddress,
}

impl RamStealer {
    #[must_use]
    pub const fn new(layout: RamLayout) -> Self {
        Self {
            next: layout.first_free,
            end: layout.last_addr,
        }
    }

    /// Take `npages` frames off the bottom of free RAM.
    ///
    /// Returns `None` for an empty request or if RAM is exhausted.
    pub fn steal(&mut self, npages: usize) -> Option<PhysicalPage> {
        if npages == 0 {
            return None;
        }
        let base = self.next.align_up()?;
        let bytes = u32::try_from(npages).ok()?.checked_mul(PAGE_SIZE)?;
        let end = base.as_u32().checked_add(bytes)?;
        if end > self.end.as_u32() {
            return None;
        }
        self.next = PhysicalAddress::new(end);
        Some(base.page())
    }

    /// Memory not yet stolen.
    #[must_use]
    pub const fn remaining(&self) -> RamLayout {
        RamLayout::new(self.next, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stealer() -> RamStealer {
        RamStealer::new(RamLayout::new(
            PhysicalAddress::new(0x2800),
            PhysicalAddress::new(0x8000),
        ))
    }

    #[test]
    fn steals_page_aligned_runs_in_order() {
        let mut s = stealer();
        assert_eq!(s.steal(2), Some(PhysicalPage::from_number(3)));
        assert_eq!(s.steal(1), Some(PhysicalPage::from_number(5)));
        assert_eq!(s.remaining().first_free, PhysicalAddress::new(0x6000));
    }

    #[test]
    fn exhaustion_leaves_stealer_unchanged() {
        let mut s = stealer();
        assert_eq!(s.steal(6), None);
        assert_eq!(s.steal(0), None);
        assert_eq!(s.steal(5), Some(PhysicalPage::from_number(3)));
        assert_eq!(s.steal(1), None);
        assert_eq!(s.remaining().first_free, PhysicalAddress::new(0x8000));
    }
}
