//! # Page Directory (top level)
//!
//! - [`DirectoryIndex`]: index type for VA bits `[31:22]`.
//! - [`DirectoryEntry`]: a PDE. Bit 0 says whether a second-level table
//!   exists; bits 12–31 hold that table's frame number.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PDEs.
//!
//! The present bit is the only evidence that a table exists. It is set by
//! [`DirectoryEntry::table`] together with the frame number, so an entry can
//! never claim a table without also naming its frame.

use bitfield_struct::bitfield;
use kernel_info::memory::{PD_ENTRIES, PD_MASK, PD_SHIFT};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};

/// Index into the page directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

impl DirectoryIndex {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(((va.as_u32() & PD_MASK) >> PD_SHIFT) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PD_ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A page directory entry (PDE).
///
/// | Bits  | Meaning |
/// |-------|---------|
/// | 0     | Second-level table present |
/// | 1–11  | Unused, zero |
/// | 12–31 | Frame number of the second-level table |
#[doc(alias = "PDE")]
#[bitfield(u32)]
pub struct DirectoryEntry {
    /// Set if `frame` names a live second-level table.
    present: bool,

    #[bits(11)]
    _unused: u16,

    /// Frame number of the second-level table.
    #[bits(20)]
    frame: u32,
}

impl DirectoryEntry {
    /// A slot with no second-level table.
    #[inline]
    #[must_use]
    pub const fn absent() -> Self {
        Self::new()
    }

    /// A slot pointing at the table stored in `page`.
    #[inline]
    #[must_use]
    pub const fn table(page: PhysicalPage) -> Self {
        Self::new().with_frame(page.number()).with_present(true)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.present()
    }

    /// The second-level table frame, if present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage> {
        if self.present() {
            Some(PhysicalPage::from_number(self.frame()))
        } else {
            None
        }
    }
}

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [DirectoryEntry; PD_ENTRIES],
}

impl PageDirectory {
    /// Create a fully zeroed directory (all slots absent).
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [DirectoryEntry::absent(); PD_ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> DirectoryEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: DirectoryEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Mark every slot absent.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(DirectoryEntry::absent());
    }

    /// Every present slot together with the frame of its table.
    #[allow(clippy::cast_possible_truncation)]
    pub fn tables(&self) -> impl Iterator<Item = (DirectoryIndex, PhysicalPage)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.next_table().map(|t| (DirectoryIndex::new(i as u16), t)))
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}
