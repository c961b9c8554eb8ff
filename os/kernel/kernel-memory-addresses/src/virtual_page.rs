use crate::{MemoryAddress, PAGE_SHIFT, PageOffset, VirtualAddress};
use core::fmt;

/// Virtual page base.
///
/// The page-aligned base of a 4 KiB virtual page. Its [`number`](Self::number)
/// is the virtual page number (VPN) programmed into `EntryHi` on a TLB fill.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(MemoryAddress);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn from_addr(v: VirtualAddress) -> Self {
        Self(v.0.align_down())
    }

    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(MemoryAddress::new(number << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0.as_u32() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> VirtualAddress {
        VirtualAddress(MemoryAddress::new(self.0.as_u32() | off.as_u32()))
    }

    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u32) -> Self {
        Self::from_number(self.number() + n)
    }

    #[inline]
    #[must_use]
    pub const fn pages_since(self, earlier: Self) -> u32 {
        self.number() - earlier.number()
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#010X})", self.0.as_u32())
    }
}

impl From<VirtualAddress> for VirtualPage {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        Self::from_addr(value)
    }
}
