use crate::{PAGE_FRAME, PAGE_SIZE, PageOffset};
use core::fmt;
use core::ops::{Add, AddAssign, Sub};

/// Principal raw memory address ([virtual](super::VirtualAddress) or [physical](super::PhysicalAddress)).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u32);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The page that contains this address (lower bits zeroed).
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    /// Round up to the next page boundary, or `None` if that would wrap
    /// past the top of the address space.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_SIZE - 1) {
            Some(v) => Some(Self(v & PAGE_FRAME)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & !PAGE_FRAME == 0
    }

    /// The offset within the page that contains this address.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> PageOffset {
        PageOffset::from_addr(self)
    }

    /// Split into (page base, in-page offset).
    #[inline]
    #[must_use]
    pub const fn split(self) -> (Self, PageOffset) {
        (self.align_down(), self.offset())
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryAddress(0x{:08X})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for MemoryAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<MemoryAddress> for u32 {
    #[inline]
    fn from(a: MemoryAddress) -> Self {
        a.as_u32()
    }
}

impl Add<u32> for MemoryAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for MemoryAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl Sub for MemoryAddress {
    type Output = u32;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
