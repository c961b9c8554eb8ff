//! # Coremap
//!
//! One [`FrameDescriptor`] per physical frame, stored in RAM right after the
//! memory the kernel occupied at boot. Every frame is in one of three states:
//!
//! ```text
//!            allocate                     free
//!   FREE ─────────────────► IN-USE ─────────────────► FREE
//!
//!   FIXED   (kernel image, stolen boot memory, the coremap itself; never changes)
//! ```
//!
//! ## Locks
//!
//! Three sleeping locks, always taken in this order:
//!
//! 1. block-id counter (taken and released on its own)
//! 2. free-pointer (`cursor`)
//! 3. descriptor array
//!
//! The free-pointer and the descriptor array are only ever locked together
//! through [`Coremap::with_cursor_and_frames`]. A run is observed free and
//! marked in-use under the same descriptor lock, so two allocators can never
//! be handed the same frame.
//!
//! ## Search
//!
//! A contiguous request scans forward from the free-pointer for `n`
//! consecutive usable frames. A FIXED frame, or an IN-USE frame the
//! [`EvictionPolicy`] refuses, breaks the run and the scan restarts after it.
//! If the scan runs off the end of RAM it is repeated once from frame 0.
//! Nothing found means [`FrameAllocError::OutOfMemory`]; a partial run is
//! never handed out.

use crate::eviction::{EvictionPolicy, NoEviction};
use crate::vm::VmError;
use core::fmt;
use core::mem::{MaybeUninit, size_of};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
use kernel_sync::SleepMutex;
use kernel_vmem::{
    AddressSpace, AddressSpaceError, FrameAlloc, FrameAllocError, FrameOwner, PhysMapper,
};
use log::{debug, info, warn};

/// Lifecycle state of one physical frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameState {
    Free,
    /// Reserved at bootstrap. Never allocated, never freed.
    Fixed,
    InUse,
}

/// Identifies the frames handed out by one allocation.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(u32);

impl BlockId {
    /// Recorded on every frame reserved at bootstrap.
    pub const BOOT: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk#{}", self.0)
    }
}

/// Bookkeeping for one physical frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameDescriptor {
    pub state: FrameState,
    pub owner: Option<FrameOwner>,
    pub block: Option<BlockId>,
    /// Frames in the block; set on every frame of an allocated block.
    pub block_size: Option<usize>,
}

impl FrameDescriptor {
    pub const FREE: Self = Self {
        state: FrameState::Free,
        owner: None,
        block: None,
        block_size: None,
    };

    pub const FIXED: Self = Self {
        state: FrameState::Fixed,
        owner: Some(FrameOwner::Kernel),
        block: Some(BlockId::BOOT),
        block_size: None,
    };

    #[inline]
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, FrameState::Free)
    }
}

/// Physical memory handed to the VM system at boot.
///
/// Everything below `first_free` is in use by the kernel; RAM ends at
/// `last_addr` (exclusive).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RamLayout {
    pub first_free: PhysicalAddress,
    pub last_addr: PhysicalAddress,
}

impl RamLayout {
    #[must_use]
    pub const fn new(first_free: PhysicalAddress, last_addr: PhysicalAddress) -> Self {
        Self {
            first_free,
            last_addr,
        }
    }

    /// Number of frames between physical address 0 and `last_addr`.
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.last_addr.as_usize() / PAGE_SIZE as usize
    }
}

/// Frame counts by state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CoremapStats {
    pub free: usize,
    pub fixed: usize,
    pub in_use: usize,
}

/// The physical frame allocator.
pub struct Coremap<'m, E: EvictionPolicy = NoEviction> {
    next_block: SleepMutex<u32>,
    cursor: SleepMutex<usize>,
    frames: SleepMutex<&'m mut [FrameDescriptor]>,
    policy: E,
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn frame_at(index: usize) -> PhysicalPage {
    // A 32-bit physical address space has at most 2^20 frames.
    PhysicalPage::from_number(index as u32)
}

impl<'m, E: EvictionPolicy> Coremap<'m, E> {
    /// Build the coremap in RAM starting at `layout.first_free`.
    ///
    /// Frames below the first free address and the frames holding the
    /// descriptor array are marked FIXED. The free-pointer starts just past
    /// them.
    ///
    /// # Safety
    /// The memory from `layout.first_free` up to `layout.last_addr` must be
    /// unused RAM reachable through `mapper` for all of `'m`.
    ///
    /// # Errors
    /// [`VmError::CoremapTooLarge`] if the descriptor array would leave no
    /// frame to allocate.
    ///
    /// # Panics
    /// If `last_addr` is not page aligned.
    pub unsafe fn bootstrap<M: PhysMapper + ?Sized>(
        mapper: &'m M,
        layout: RamLayout,
        policy: E,
    ) -> Result<Self, VmError> {
        assert!(
            layout.last_addr.is_page_aligned(),
            "end of RAM {} is not page aligned",
            layout.last_addr
        );
        let nframes = layout.frames();
        let too_large = VmError::CoremapTooLarge { frames: nframes };

        let storage = layout.first_free.align_up().ok_or(too_large)?;
        let storage_pages = (nframes * size_of::<FrameDescriptor>()).div_ceil(PAGE_SIZE as usize);
        let reserved = storage.page().number() as usize + storage_pages;
        if reserved >= nframes {
            warn!("coremap: {nframes} frames leave no room after {storage}");
            return Err(too_large);
        }

        // SAFETY: the caller hands over [first_free, last_addr); the array
        // ends before `last_addr` because `reserved < nframes`.
        let frames: &'m mut [FrameDescriptor] = unsafe {
            let head = mapper
                .phys_to_mut::<MaybeUninit<FrameDescriptor>>(storage)
                .as_mut_ptr();
            for i in 0..nframes {
                let desc = if i < reserved {
                    FrameDescriptor::FIXED
                } else {
                    FrameDescriptor::FREE
                };
                head.add(i).write(desc);
            }
            core::slice::from_raw_parts_mut(head, nframes)
        };

        info!(
            "coremap: {nframes} frames, {storage_pages} descriptor pages at {storage}, first allocatable {}",
            frame_at(reserved)
        );

        Ok(Self {
            next_block: SleepMutex::new(BlockId::BOOT.0 + 1),
            cursor: SleepMutex::new(reserved),
            frames: SleepMutex::new(frames),
            policy,
        })
    }

    /// Total number of frames described.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Snapshot of one frame's descriptor, `None` past the end of RAM.
    #[must_use]
    pub fn descriptor(&self, frame: PhysicalPage) -> Option<FrameDescriptor> {
        self.frames.lock().get(frame.number() as usize).copied()
    }

    /// Whether `frame` was reserved at bootstrap.
    #[must_use]
    pub fn is_fixed(&self, frame: PhysicalPage) -> bool {
        self.descriptor(frame)
            .is_some_and(|d| d.state == FrameState::Fixed)
    }

    /// Number of in-use frames recorded for `owner`.
    #[must_use]
    pub fn frames_owned_by(&self, owner: FrameOwner) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|d| d.state == FrameState::InUse && d.owner == Some(owner))
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> CoremapStats {
        self.frames
            .lock()
            .iter()
            .fold(CoremapStats::default(), |mut s, d| {
                match d.state {
                    FrameState::Free => s.free += 1,
                    FrameState::Fixed => s.fixed += 1,
                    FrameState::InUse => s.in_use += 1,
                }
                s
            })
    }

    /// Allocate a frame for `aspace` and map it at `va`.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if no frame (or no frame for a
    /// missing page table) is available.
    ///
    /// # Panics
    /// If `va` is already mapped.
    pub fn allocate_single_for_address_space<M: PhysMapper>(
        &self,
        aspace: &AddressSpace<'_, M>,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, AddressSpaceError> {
        aspace.materialize(self, va)
    }

    fn next_block(&self) -> BlockId {
        let mut next = self.next_block.lock();
        let id = BlockId(*next);
        *next = next.checked_add(1).unwrap_or(BlockId::BOOT.0 + 1);
        id
    }

    /// Lock the free-pointer, then the descriptor array.
    fn with_cursor_and_frames<R>(
        &self,
        f: impl FnOnce(&mut usize, &mut [FrameDescriptor]) -> R,
    ) -> R {
        let mut cursor = self.cursor.lock();
        let mut frames = self.frames.lock();
        f(&mut cursor, &mut **frames)
    }

    fn is_usable(&self, index: usize, desc: &FrameDescriptor) -> bool {
        match desc.state {
            FrameState::Free => true,
            FrameState::Fixed => false,
            FrameState::InUse => self.policy.is_evictable(frame_at(index), desc),
        }
    }

    fn find_run(&self, frames: &[FrameDescriptor], from: usize, npages: usize) -> Option<usize> {
        let mut start = from;
        let mut len = 0;
        for (i, desc) in frames.iter().enumerate().skip(from) {
            if self.is_usable(i, desc) {
                if len == 0 {
                    start = i;
                }
                len += 1;
                if len == npages {
                    return Some(start);
                }
            } else {
                len = 0;
            }
        }
        None
    }

    /// Hand the whole block containing frame `index` to the policy and mark
    /// every frame of it FREE. Returns the index just past the block.
    fn evict_block(&self, frames: &mut [FrameDescriptor], index: usize) -> usize {
        let victim = frames[index];
        let (Some(block), Some(size)) = (victim.block, victim.block_size) else {
            panic!("evicting {} which is not part of a block", frame_at(index));
        };
        let mut start = index;
        while start > 0 && frames[start - 1].block == Some(block) {
            start -= 1;
        }

        let base = frame_at(start);
        self.policy.evict(base, size, &victim);
        for desc in &mut frames[start..start + size] {
            assert_eq!(desc.block, Some(block), "{block:?} at {base} is torn");
            *desc = FrameDescriptor::FREE;
        }
        debug!("coremap: evicted {size} frames at {base} from {:?}", victim.owner);
        start + size
    }

    fn release(&self, base: PhysicalPage, single: bool) {
        let index = base.number() as usize;
        let size = self.with_cursor_and_frames(|cursor, frames| {
            let Some(first) = frames.get(index).copied() else {
                panic!("free of {base} past the end of RAM");
            };
            let (FrameState::InUse, Some(block), Some(size)) =
                (first.state, first.block, first.block_size)
            else {
                panic!("free of {base} which is not allocated");
            };
            if single {
                assert_eq!(size, 1, "single free of {base} in a {size}-frame block");
            }
            assert!(
                index == 0 || frames[index - 1].block != Some(block),
                "free of {base} which is not the first frame of {block:?}"
            );

            for desc in &mut frames[index..index + size] {
                assert_eq!(desc.block, Some(block), "{block:?} at {base} is torn");
                *desc = FrameDescriptor::FREE;
            }
            *cursor = index;
            size
        });
        debug!("coremap: freed {size} frames at {base}");
    }
}

/// Index of the first free frame at or after `from`, or 0 if there is none
/// before the end of RAM.
fn advance_cursor(frames: &[FrameDescriptor], from: usize) -> usize {
    frames
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, d)| d.is_free())
        .map_or(0, |(i, _)| i)
}

impl<E: EvictionPolicy> FrameAlloc for Coremap<'_, E> {
    /// # Panics
    /// If `npages` is zero.
    fn allocate_contiguous(
        &self,
        npages: usize,
        owner: FrameOwner,
    ) -> Result<PhysicalPage, FrameAllocError> {
        assert!(npages > 0, "allocation of zero frames");
        let block = self.next_block();

        let claimed = self.with_cursor_and_frames(|cursor, frames| {
            let base = self
                .find_run(frames, *cursor, npages)
                .or_else(|| self.find_run(frames, 0, npages))?;

            let mut i = base;
            while i < base + npages {
                i = if frames[i].state == FrameState::InUse {
                    self.evict_block(frames, i)
                } else {
                    i + 1
                };
            }
            for desc in &mut frames[base..base + npages] {
                *desc = FrameDescriptor {
                    state: FrameState::InUse,
                    owner: Some(owner),
                    block: Some(block),
                    block_size: Some(npages),
                };
            }
            *cursor = advance_cursor(frames, base + npages);
            Some(base)
        });

        match claimed {
            Some(base) => {
                let base = frame_at(base);
                debug!("coremap: {npages} frames at {base} as {block:?} for {owner:?}");
                Ok(base)
            }
            None => {
                warn!("coremap: no run of {npages} frames for {owner:?}");
                Err(FrameAllocError::OutOfMemory { requested: npages })
            }
        }
    }

    /// # Panics
    /// If `base` is not the first frame of an allocated block.
    fn free_contiguous(&self, base: PhysicalPage) {
        self.release(base, false);
    }

    fn allocate_single(&self, owner: FrameOwner) -> Result<PhysicalPage, FrameAllocError> {
        self.allocate_contiguous(1, owner)
    }

    /// # Panics
    /// If `frame` is not allocated or belongs to a larger block.
    fn free_single(&self, frame: PhysicalPage) {
        self.release(frame, true);
    }
}
