//! # Two-Level Page Tables
//!
//! A user virtual address is split into three fields:
//!
//! ```text
//! | 31‒22     | 21‒12  | 11‒0   |
//! | Directory | Table  | Offset |
//! ```
//!
//! - [`DirectoryIndex`] selects one of 1024 [`DirectoryEntry`] slots in the
//!   address space's [`PageDirectory`].
//! - [`TableIndex`] selects one of 1024 [`TableEntry`] slots in the
//!   second-level [`PageTable`] that directory slot points to.
//! - The offset selects the byte within the 4 KiB frame.
//!
//! Both levels are one 4 KiB frame each (1024 × 4-byte entries).

mod directory;
mod table;

pub use directory::{DirectoryEntry, DirectoryIndex, PageDirectory};
pub use table::{PageTable, TableEntry, TableIndex};

use kernel_memory_addresses::{VirtualAddress, VirtualPage};

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}

/// The virtual page addressed by a (directory, table) index pair.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn join_indices(dir: DirectoryIndex, table: TableIndex) -> VirtualPage {
    VirtualPage::from_number(((dir.as_usize() as u32) << 10) | table.as_usize() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_bit_layout() {
        let va = VirtualAddress::new(0x7FFF_E123);
        let (d, t) = split_indices(va);
        assert_eq!(d.as_usize(), 0x1FF);
        assert_eq!(t.as_usize(), 0x3FE);
        assert_eq!(join_indices(d, t), va.page());
    }

    #[test]
    fn extreme_indices() {
        let (d, t) = split_indices(VirtualAddress::new(0));
        assert_eq!((d.as_usize(), t.as_usize()), (0, 0));

        let (d, t) = split_indices(VirtualAddress::new(0xFFFF_FFFF));
        assert_eq!((d.as_usize(), t.as_usize()), (1023, 1023));
    }
}
