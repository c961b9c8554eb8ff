use crate::{MemoryAddress, PAGE_SHIFT, PageOffset, PhysicalAddress};
use core::fmt;

/// Physical frame base.
///
/// A `PhysicalPage` represents the **page-aligned base** of a 4 KiB physical
/// frame. Its [`number`](Self::number) is the frame index used by the coremap
/// and stored in the high 20 bits of directory and table entries.
///
/// ### Invariants
/// - The low [`PAGE_SHIFT`] bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(MemoryAddress);

impl PhysicalPage {
    #[inline]
    #[must_use]
    pub const fn from_addr(p: PhysicalAddress) -> Self {
        Self(p.0.align_down())
    }

    /// Frame with index `number`, i.e. base address `number << 12`.
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(MemoryAddress::new(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> PhysicalAddress {
        PhysicalAddress(MemoryAddress::new(self.0.as_u32() | off.as_u32()))
    }

    /// The frame `n` frames after this one.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u32) -> Self {
        Self::from_number(self.number() + n)
    }

    /// Number of frames from `earlier` up to this frame.
    #[inline]
    #[must_use]
    pub const fn pages_since(self, earlier: Self) -> u32 {
        self.number() - earlier.number()
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(#{})", self.number())
    }
}

impl From<PhysicalAddress> for PhysicalPage {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        Self::from_addr(value)
    }
}
