//! Eviction hook consulted when a contiguous run crosses an in-use frame.

use crate::coremap::FrameDescriptor;
use kernel_memory_addresses::PhysicalPage;

/// Decides whether an in-use frame may be reclaimed for a new allocation.
///
/// Both methods run with the coremap lock held and must not call back into
/// the allocator.
pub trait EvictionPolicy: Send + Sync {
    /// Whether `frame`, currently described by `desc`, may be taken away from
    /// its owner.
    fn is_evictable(&self, frame: PhysicalPage, desc: &FrameDescriptor) -> bool;

    /// Detach the whole block of `npages` frames starting at `base` from its
    /// owner. Called once per victim block, for a frame
    /// [`is_evictable`](Self::is_evictable) accepted; `desc` is that block's
    /// descriptor. On return every frame of the block is FREE and the part
    /// overlapping the run is handed to the new owner.
    fn evict(&self, base: PhysicalPage, npages: usize, desc: &FrameDescriptor);
}

/// Refuses every frame; an in-use frame always breaks a run.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    #[inline]
    fn is_evictable(&self, _frame: PhysicalPage, _desc: &FrameDescriptor) -> bool {
        false
    }

    fn evict(&self, base: PhysicalPage, _npages: usize, _desc: &FrameDescriptor) {
        unreachable!("NoEviction asked to evict {base}");
    }
}
