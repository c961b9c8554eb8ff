use crate::{MemoryAddress, PageOffset, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// It carries the *kind* of address at the type level so you don't accidentally
/// mix virtual and physical values.
///
/// ### Semantics
/// - Use [`VirtualAddress::page`] / [`VirtualAddress::offset`] / [`VirtualAddress::split`]
///   to derive the page base and the in-page offset.
/// - Combine a [`VirtualPage`] and a [`PageOffset`] with [`VirtualPage::join`]
///   to reconstruct a `VirtualAddress`.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0040_0ABC);
/// let (vp, off) = va.split();
/// assert_eq!(vp.base().as_u32(), 0x0040_0000);
/// assert_eq!(vp.join(off), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::from_addr(self)
    }

    #[inline]
    #[must_use]
    pub const fn offset(self) -> PageOffset {
        self.0.offset()
    }

    #[inline]
    #[must_use]
    pub const fn split(self) -> (VirtualPage, PageOffset) {
        (self.page(), self.offset())
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(self.0.align_down())
    }

    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match self.0.align_up() {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<VirtualPage> for VirtualAddress {
    fn from(value: VirtualPage) -> Self {
        value.base()
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
