//! Simulated RAM and a bookkeeping frame allocator for unit tests.
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for crates that build on top of the address-space layer.

#![allow(
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::new_without_default
)]

use crate::{FrameAlloc, FrameAllocError, FrameOwner, PhysMapper};
use core::cell::{RefCell, UnsafeCell};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Aligned4K([u8; PAGE_SIZE as usize]);

/// Physical memory as one contiguous run of frames; physical address 0 is
/// the first byte of frame 0.
pub struct TestPhys {
    frames: Box<[UnsafeCell<Aligned4K>]>,
}

// Tests only touch disjoint frames from different threads.
unsafe impl Sync for TestPhys {}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n)
                .map(|_| UnsafeCell::new(Aligned4K([0; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    /// Raw pointer to `len` bytes at `pa`, derived from the whole of RAM so
    /// that it may cross frame boundaries.
    fn ram_ptr(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        let ram = PAGE_SIZE as usize * self.frames.len();
        assert!(
            pa.as_usize() + len <= ram,
            "{pa} + {len:#x} is past the end of {ram:#x} bytes of RAM"
        );
        let base = UnsafeCell::raw_get(self.frames.as_ptr()).cast::<u8>();
        unsafe { base.add(pa.as_usize()) }
    }

    pub fn write(&self, pa: PhysicalAddress, bytes: &[u8]) {
        let dst = self.ram_ptr(pa, bytes.len());
        unsafe { dst.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len()) };
    }

    pub fn read(&self, pa: PhysicalAddress, len: usize) -> Vec<u8> {
        let src = self.ram_ptr(pa, len);
        unsafe { core::slice::from_raw_parts(src, len) }.to_vec()
    }

    pub fn is_zeroed(&self, page: PhysicalPage) -> bool {
        self.read(page.base(), PAGE_SIZE as usize)
            .iter()
            .all(|b| *b == 0)
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.ram_ptr(pa, size_of::<T>()).cast::<T>() }
    }
}

#[derive(Copy, Clone, Default)]
struct Slot {
    owner: Option<FrameOwner>,
    base: u32,
    size: usize,
    single: bool,
}

/// First-fit allocator that remembers which path allocated each frame and
/// panics if the paths are mixed on free.
pub struct TestFrames {
    slots: RefCell<Vec<Slot>>,
}

impl TestFrames {
    pub fn with_frames(n: usize) -> Self {
        Self {
            slots: RefCell::new(vec![Slot::default(); n]),
        }
    }

    /// Mark the first `n` frames as taken by the kernel.
    pub fn reserve(&self, n: usize) {
        for s in self.slots.borrow_mut().iter_mut().take(n) {
            s.owner = Some(FrameOwner::Kernel);
        }
    }

    pub fn owned_by(&self, owner: FrameOwner) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|s| s.owner == Some(owner))
            .count()
    }

    pub fn in_use(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.owner.is_some()).count()
    }

    pub fn owner_of(&self, frame: PhysicalPage) -> Option<FrameOwner> {
        self.slots.borrow()[frame.number() as usize].owner
    }

    fn take(
        &self,
        n: usize,
        owner: FrameOwner,
        single: bool,
    ) -> Result<PhysicalPage, FrameAllocError> {
        let oom = FrameAllocError::OutOfMemory { requested: n };
        let mut slots = self.slots.borrow_mut();
        if n == 0 || n > slots.len() {
            return Err(oom);
        }
        let start = (0..=slots.len() - n)
            .find(|&i| slots[i..i + n].iter().all(|s| s.owner.is_none()))
            .ok_or(oom)?;
        let base = u32::try_from(start).expect("frame number fits in 32 bits");
        for s in &mut slots[start..start + n] {
            *s = Slot {
                owner: Some(owner),
                base,
                size: n,
                single,
            };
        }
        Ok(PhysicalPage::from_number(base))
    }
}

impl FrameAlloc for TestFrames {
    fn allocate_contiguous(
        &self,
        npages: usize,
        owner: FrameOwner,
    ) -> Result<PhysicalPage, FrameAllocError> {
        self.take(npages, owner, false)
    }

    fn free_contiguous(&self, base: PhysicalPage) {
        let mut slots = self.slots.borrow_mut();
        let first = slots[base.number() as usize];
        assert!(first.owner.is_some() && !first.single, "block free of {base}");
        assert_eq!(first.base, base.number(), "{base} is not a block base");
        let start = base.number() as usize;
        slots[start..start + first.size].fill(Slot::default());
    }

    fn allocate_single(&self, owner: FrameOwner) -> Result<PhysicalPage, FrameAllocError> {
        self.take(1, owner, true)
    }

    fn free_single(&self, frame: PhysicalPage) {
        let mut slots = self.slots.borrow_mut();
        let slot = &mut slots[frame.number() as usize];
        assert!(slot.owner.is_some() && slot.single, "single free of {frame}");
        *slot = Slot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_may_span_consecutive_frames() {
        let phys = TestPhys::with_frames(4);
        let pa = PhysicalPage::from_number(1).base() + (PAGE_SIZE - 4);
        let word = unsafe { phys.phys_to_mut::<[u8; 8]>(pa) };
        word.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert_eq!(phys.read(PhysicalPage::from_number(2).base(), 4), [5, 6, 7, 8]);
        assert_eq!(phys.read(pa, 8), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(phys.is_zeroed(PhysicalPage::from_number(0)));
        assert!(phys.is_zeroed(PhysicalPage::from_number(3)));
    }

    #[test]
    fn copy_frame_moves_a_whole_page() {
        let phys = TestPhys::with_frames(3);
        let src = PhysicalPage::from_number(0);
        let dst = PhysicalPage::from_number(2);
        phys.write(src.base() + 0xFFC, &[0xAA; 4]);

        unsafe { phys.copy_frame(dst, src) };
        assert_eq!(phys.read(dst.base() + 0xFFC, 4), [0xAA; 4]);
        assert!(phys.is_zeroed(PhysicalPage::from_number(1)));
    }

    #[test]
    #[should_panic(expected = "past the end")]
    fn access_past_the_end_of_ram_panics() {
        let phys = TestPhys::with_frames(1);
        let _ = phys.read(PhysicalAddress::new(PAGE_SIZE - 2), 4);
    }
}
