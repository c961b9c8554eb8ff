use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Unique identity of an [`AddressSpace`](crate::AddressSpace).
///
/// Frame descriptors record the identity instead of a pointer so the
/// allocator can answer "which frames belong to this space" without holding
/// a reference to it.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressSpaceId(u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl AddressSpaceId {
    /// Hand out a fresh identity.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

/// Who a frame is allocated to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FrameOwner {
    /// Kernel buffers and frames reserved at boot.
    Kernel,
    /// Page tables and pages of one address space.
    Space(AddressSpaceId),
}
