use kernel_info::memory::{MAX_REGIONS, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// A virtually and physically contiguous run of pages fixed at load time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub vbase: VirtualPage,
    pub pbase: PhysicalPage,
    pub npages: u32,
}

impl Segment {
    /// Whether `va` lies inside `[vbase, vbase + npages * PAGE_SIZE)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        let base = self.vbase.base().as_u32();
        let va = va.as_u32();
        va >= base && (va - base) / PAGE_SIZE < self.npages
    }

    /// Whether `frame` is one of the frames backing this segment.
    #[inline]
    #[must_use]
    pub const fn backs(&self, frame: PhysicalPage) -> bool {
        frame.number() >= self.pbase.number() && frame.pages_since(self.pbase) < self.npages
    }

    /// Physical address of `va` by linear offset, if `va` is inside.
    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.contains(va)
            .then(|| self.pbase.base() + (va.as_u32() - self.vbase.base().as_u32()))
    }
}

/// The fixed segments of a loaded address space: up to two static regions
/// and the stack.
///
/// A snapshot; it stays valid until the owning address space is destroyed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SegmentTable {
    pub regions: [Option<Segment>; MAX_REGIONS],
    pub stack: Option<Segment>,
}

impl SegmentTable {
    /// Segments in lookup order: region 1, region 2, stack.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.regions.iter().chain(core::iter::once(&self.stack)).flatten()
    }

    /// The segment containing `va`.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<&Segment> {
        self.iter().find(|s| s.contains(va))
    }

    /// Resolve `va` to its physical address.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.find(va).and_then(|s| s.translate(va))
    }

    /// Whether `frame` backs any segment.
    #[must_use]
    pub fn backs(&self, frame: PhysicalPage) -> bool {
        self.iter().any(|s| s.backs(frame))
    }
}
