use crate::{MemoryAddress, PAGE_SIZE};
use core::fmt;

/// The offset within a 4 KiB page (`0..PAGE_SIZE`).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset(u16);

impl PageOffset {
    /// Create from a raw value, asserting it is < [`PAGE_SIZE`] in debug.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < PAGE_SIZE, "offset must be < page size");
        Self((value & (PAGE_SIZE - 1)) as u16)
    }

    /// Construct from a full address's offset bits.
    #[inline]
    #[must_use]
    pub const fn from_addr(addr: MemoryAddress) -> Self {
        Self::new(addr.as_u32() & (PAGE_SIZE - 1))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageOffset({:#05X})", self.0)
    }
}

impl From<MemoryAddress> for PageOffset {
    #[inline]
    fn from(addr: MemoryAddress) -> Self {
        Self::from_addr(addr)
    }
}
