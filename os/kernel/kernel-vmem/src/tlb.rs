//! # Software-refilled TLB
//!
//! The MIPS R3000 TLB holds [`NUM_TLB`] fully associative entries, each a
//! pair of 32-bit words:
//!
//! ```text
//! EntryHi:  | 31‒12 VPN | 11‒6 ASID | 5‒0 zero |
//! EntryLo:  | 31‒12 PFN | 11 N | 10 D | 9 V | 8 G | 7‒0 zero |
//! ```
//!
//! `D` ("dirty") is the write-enable bit, `V` marks the entry valid. An entry
//! is invalidated by clearing `EntryLo` and pointing `EntryHi` at a distinct
//! kernel-segment page that user code can never reference, so no two slots
//! ever match the same address.

use bitfield_struct::bitfield;
use kernel_info::memory::{MIPS_KSEG0, NUM_TLB, PAGE_SHIFT};
use kernel_memory_addresses::{PhysicalPage, VirtualPage};

/// The high word of a TLB entry: which virtual page it translates.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    #[bits(6)]
    _zero: u8,

    /// Address space identifier (unused; all entries are flushed on switch).
    #[bits(6)]
    pub asid: u8,

    /// Virtual page number.
    #[bits(20)]
    pub vpn: u32,
}

impl EntryHi {
    /// Entry for the virtual page `page`.
    #[inline]
    #[must_use]
    pub const fn for_page(page: VirtualPage) -> Self {
        Self::new().with_vpn(page.number())
    }

    /// The per-slot invalid tag: a distinct KSEG0 page for every slot.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn invalid(slot: usize) -> Self {
        Self::new().with_vpn((MIPS_KSEG0 >> PAGE_SHIFT) + slot as u32)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::from_number(self.vpn())
    }
}

/// The low word of a TLB entry: the physical frame and its access bits.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    #[bits(8)]
    _zero: u8,

    /// Global: match regardless of ASID.
    pub global: bool,

    /// Valid: the entry takes part in translation.
    pub valid: bool,

    /// Dirty: writes are permitted.
    pub dirty: bool,

    /// Uncached access.
    pub nocache: bool,

    /// Physical frame number.
    #[bits(20)]
    pub pfn: u32,
}

impl EntryLo {
    /// An entry that never matches.
    #[inline]
    #[must_use]
    pub const fn invalid() -> Self {
        Self::new()
    }

    /// A valid, writable translation to `frame`.
    #[inline]
    #[must_use]
    pub const fn writable(frame: PhysicalPage) -> Self {
        Self::new()
            .with_pfn(frame.number())
            .with_dirty(true)
            .with_valid(true)
    }

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_number(self.pfn())
    }
}

/// Access to a translation lookaside buffer.
///
/// Callers performing a read-modify-write sequence must hold an
/// [`IrqGuard`](kernel_sync::IrqGuard) so the sequence is not interleaved
/// with an interrupt handler touching the same TLB.
pub trait Tlb {
    /// Number of slots.
    fn slots(&self) -> usize;

    /// Read slot `index`.
    fn read(&self, index: usize) -> (EntryHi, EntryLo);

    /// Overwrite slot `index`.
    fn write(&mut self, index: usize, hi: EntryHi, lo: EntryLo);

    /// The slot holding a valid entry for `page`, if any.
    fn probe(&self, page: VirtualPage) -> Option<usize> {
        (0..self.slots()).find(|&i| {
            let (hi, lo) = self.read(i);
            lo.valid() && hi.vpn() == page.number()
        })
    }

    /// The first slot whose valid bit is clear.
    fn first_free(&self) -> Option<usize> {
        (0..self.slots()).find(|&i| !self.read(i).1.valid())
    }

    /// Invalidate every slot.
    fn invalidate_all(&mut self) {
        for i in 0..self.slots() {
            self.write(i, EntryHi::invalid(i), EntryLo::invalid());
        }
    }
}

/// An in-memory TLB with [`NUM_TLB`] slots, used by simulated CPUs and tests.
#[derive(Clone, Debug)]
pub struct SoftTlb {
    entries: [(EntryHi, EntryLo); NUM_TLB],
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTlb {
    /// A TLB with every slot invalid.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|i| (EntryHi::invalid(i), EntryLo::invalid())),
        }
    }

    /// Number of valid entries.
    #[must_use]
    pub fn valid_entries(&self) -> usize {
        self.entries.iter().filter(|(_, lo)| lo.valid()).count()
    }
}

impl Tlb for SoftTlb {
    fn slots(&self) -> usize {
        NUM_TLB
    }

    fn read(&self, index: usize) -> (EntryHi, EntryLo) {
        self.entries[index]
    }

    fn write(&mut self, index: usize, hi: EntryHi, lo: EntryLo) {
        self.entries[index] = (hi, lo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lo_bit_positions() {
        let lo = EntryLo::writable(PhysicalPage::from_number(0x123));
        assert_eq!(lo.into_bits(), 0x0012_3000 | (1 << 10) | (1 << 9));
        assert_eq!(lo.frame(), PhysicalPage::from_number(0x123));
        assert!(!lo.global());
    }

    #[test]
    fn invalid_tags_are_distinct_kernel_pages() {
        let a = EntryHi::invalid(0);
        let b = EntryHi::invalid(63);
        assert_eq!(a.into_bits(), 0x8000_0000);
        assert_eq!(b.into_bits(), 0x8003_F000);
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_tlb_has_no_valid_entries() {
        let mut tlb = SoftTlb::new();
        assert_eq!(tlb.valid_entries(), 0);
        assert_eq!(tlb.first_free(), Some(0));

        let page = VirtualPage::from_number(0x400);
        tlb.write(0, EntryHi::for_page(page), EntryLo::writable(PhysicalPage::from_number(1)));
        assert_eq!(tlb.probe(page), Some(0));
        assert_eq!(tlb.first_free(), Some(1));

        tlb.invalidate_all();
        assert_eq!(tlb.valid_entries(), 0);
        assert_eq!(tlb.probe(page), None);
    }
}
