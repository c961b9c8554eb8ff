//! # Page Table (second level)
//!
//! - [`TableIndex`]: index type for VA bits `[21:12]`.
//! - [`TableEntry`]: a PTE. Bit 1 marks the page present; bits 12–31 hold the
//!   mapped frame number. The remaining low bits are kept free for swap
//!   bookkeeping.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.

use bitfield_struct::bitfield;
use kernel_info::memory::{PAGE_SHIFT, PT_ENTRIES, PT_MASK};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into a page table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() & PT_MASK) >> PAGE_SHIFT) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PT_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A page table entry (PTE).
///
/// | Bits  | Meaning |
/// |-------|---------|
/// | 0     | Unused, zero |
/// | 1     | Page present |
/// | 2–11  | Reserved for swap metadata |
/// | 12–31 | Mapped frame number |
#[doc(alias = "PTE")]
#[bitfield(u32)]
pub struct TableEntry {
    _unused: bool,

    /// Set if `frame` names the page's backing frame.
    present: bool,

    /// Reserved for swap bookkeeping; never interpreted by the walker.
    #[bits(10)]
    pub swap_metadata: u16,

    #[bits(20)]
    frame: u32,
}

impl TableEntry {
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new()
    }

    /// A present entry mapping `page`.
    #[inline]
    #[must_use]
    pub const fn mapping(page: PhysicalPage) -> Self {
        Self::new().with_frame(page.number()).with_present(true)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.present()
    }

    /// The mapped frame, if present.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<PhysicalPage> {
        if self.present() {
            Some(PhysicalPage::from_number(self.frame()))
        } else {
            None
        }
    }
}

/// A second-level page table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [TableEntry; PT_ENTRIES],
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [TableEntry::absent(); PT_ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> TableEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: TableEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(TableEntry::absent());
    }

    /// Every present entry together with its mapped frame.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mappings(&self) -> impl Iterator<Item = (TableIndex, PhysicalPage)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.page().map(|p| (TableIndex::new(i as u16), p)))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_is_bit_one() {
        let e = TableEntry::mapping(PhysicalPage::from_number(0x00ABC));
        assert_eq!(e.into_bits(), 0x00AB_C002);
        assert_eq!(e.page(), Some(PhysicalPage::from_number(0xABC)));
    }

    #[test]
    fn swap_metadata_does_not_touch_mapping() {
        let e = TableEntry::mapping(PhysicalPage::from_number(7)).with_swap_metadata(0x3FF);
        assert!(e.is_present());
        assert_eq!(e.page(), Some(PhysicalPage::from_number(7)));
        assert_eq!(e.into_bits() & 0xFFC, 0xFFC);
    }

    #[test]
    fn raw_bit_zero_is_not_presence() {
        let e = TableEntry::from_bits(0x0000_5001);
        assert!(!e.is_present());
        assert_eq!(e.page(), None);
    }
}
