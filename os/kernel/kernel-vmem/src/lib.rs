//! # Virtual Memory Support
//!
//! Two-level paging, per-process address spaces and the TLB refill path for a
//! 32-bit MIPS-style machine with a software-managed TLB.
//!
//! ## What you get
//! - An [`address space`](address_space) owning a page directory, its
//!   second-level tables and the bookkeeping for two static regions, a heap
//!   and a fixed-size stack.
//! - Typed [`DirectoryEntry`]/[`TableEntry`] words and 4 KiB-aligned
//!   [`PageDirectory`]/[`PageTable`] frames.
//! - A [`SegmentTable`] describing where each segment lives physically.
//! - A [`Tlb`] abstraction with MIPS `EntryHi`/`EntryLo` words and the
//!   [`fault`] handler that refills it.
//! - The allocator/mapper seams ([`FrameAlloc`], [`PhysMapper`]) the kernel's
//!   frame allocator and direct map plug into.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12  | 11‒0   |
//! | Directory | Table  | Offset |
//!
//!  PageDirectory ──PDE──► PageTable ──PTE──► 4 KiB frame
//! ```
//!
//! A directory slot owns a second-level table only if its present bit (bit 0)
//! is set. A table slot maps a frame only if its present bit (bit 1) is set.
//! Both entries keep the frame number in bits 12–31.
//!
//! ## TLB refill
//!
//! User addresses are translated by the TLB alone. On a miss the trap layer
//! calls [`fault::handle_fault`], which finds the segment containing the
//! address, computes the physical frame by linear offset inside that segment
//! and writes a valid, dirty entry into the first free TLB slot.

#![cfg_attr(not(any(test, doctest, feature = "test-support")), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod fault;
mod owner;
pub mod page_table;
mod segment;
pub mod tlb;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::address_space::{AddressSpace, AddressSpaceError, RegionFlags};
pub use crate::fault::{FaultContext, FaultError, FaultKind};
pub use crate::owner::{AddressSpaceId, FrameOwner};
pub use crate::page_table::{DirectoryEntry, PageDirectory, PageTable, TableEntry};
pub use crate::segment::{Segment, SegmentTable};
pub use crate::tlb::{EntryHi, EntryLo, SoftTlb, Tlb};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_info::errno::ENOMEM;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Failure reported by a [`FrameAlloc`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    /// No run of `requested` usable frames exists, even after rescanning
    /// from the start of memory.
    #[error("out of memory: no run of {requested} free frames")]
    OutOfMemory { requested: usize },
}

impl FrameAllocError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory { .. } => ENOMEM,
        }
    }
}

/// Physical frame allocator used by address spaces.
///
/// Two disciplines exist and must not be mixed: frames obtained through
/// [`allocate_contiguous`](Self::allocate_contiguous) are returned with
/// [`free_contiguous`](Self::free_contiguous) (by the block's base), frames
/// obtained through [`allocate_single`](Self::allocate_single) are returned
/// with [`free_single`](Self::free_single).
///
/// Methods take `&self`; implementations serialize internally so one
/// allocator can serve every CPU.
pub trait FrameAlloc {
    /// Allocate `npages` physically contiguous frames as one block.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no suitable run exists. A partial
    /// run is never returned.
    fn allocate_contiguous(
        &self,
        npages: usize,
        owner: FrameOwner,
    ) -> Result<PhysicalPage, FrameAllocError>;

    /// Release the block whose first frame is `base`.
    fn free_contiguous(&self, base: PhysicalPage);

    /// Allocate one frame for page-table storage or an on-demand page.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] if no frame is free.
    fn allocate_single(&self, owner: FrameOwner) -> Result<PhysicalPage, FrameAllocError>;

    /// Release a frame obtained from [`allocate_single`](Self::allocate_single).
    fn free_single(&self, frame: PhysicalPage);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (on this machine: the KSEG0 direct map).
///
/// # Safety
/// - You must ensure `pa` is backed by RAM and writable through the mapping
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the frame at `page` as a page directory.
    ///
    /// # Safety
    /// `page` must hold a directory owned by the caller, with no other live
    /// reference to it.
    #[inline]
    unsafe fn directory_mut<'a>(&self, page: PhysicalPage) -> &'a mut PageDirectory {
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the frame at `page` as a second-level page table.
    ///
    /// # Safety
    /// `page` must hold a table owned by the caller, with no other live
    /// reference to it.
    #[inline]
    unsafe fn table_mut<'a>(&self, page: PhysicalPage) -> &'a mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Fill the frame at `page` with zero bytes.
    ///
    /// # Safety
    /// `page` must be a frame the caller owns exclusively.
    #[inline]
    unsafe fn zero_frame(&self, page: PhysicalPage) {
        let bytes = unsafe { self.phys_to_mut::<[u8; PAGE_SIZE as usize]>(page.base()) };
        bytes.fill(0);
    }

    /// Copy the contents of frame `src` into frame `dst`.
    ///
    /// # Safety
    /// Both frames must be owned by the caller and `src != dst`.
    #[inline]
    unsafe fn copy_frame(&self, dst: PhysicalPage, src: PhysicalPage) {
        debug_assert_ne!(dst, src, "copy_frame onto itself");
        let from = unsafe { self.phys_to_mut::<[u8; PAGE_SIZE as usize]>(src.base()) };
        let to = unsafe { self.phys_to_mut::<[u8; PAGE_SIZE as usize]>(dst.base()) };
        to.copy_from_slice(from);
    }
}
