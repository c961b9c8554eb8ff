//! # Address Space
//!
//! One process's translation structures and virtual layout: a page directory,
//! the second-level tables hanging off it, up to two static regions, a heap
//! range and a fixed-size stack.
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► define_region (≤ 2×) ──► prepare_load ──► complete_load
//!                                          │
//!                              activate ◄──┴──► deactivate
//!                                          │
//!                                       destroy
//! ```
//!
//! - [`AddressSpace::prepare_load`] backs each region and the stack with one
//!   contiguous block owned by the space and maps it page by page, in the
//!   same linear order the fault handler uses to resolve addresses.
//! - Pages outside the segments are added one frame at a time with
//!   [`AddressSpace::materialize`].
//! - The directory and every second-level table are single frames owned by
//!   the space.
//! - [`AddressSpace::copy`] builds a child with the same layout and copies
//!   every mapped page into fresh frames (eager copy).
//!
//! ## Safety
//!
//! The tables are not internally locked. The caller guarantees that no two
//! threads run `copy`, `prepare_load`, `materialize` or `destroy` on the same
//! space at once, and that a space is not destroyed while it is current on
//! any CPU.

use crate::page_table::{
    DirectoryEntry, DirectoryIndex, PageDirectory, PageTable, TableEntry, TableIndex,
    join_indices,
};
use crate::segment::{Segment, SegmentTable};
use crate::tlb::Tlb;
use crate::{AddressSpaceId, FrameAlloc, FrameAllocError, FrameOwner, PhysMapper};
use bitfield_struct::bitfield;
use core::fmt;
use kernel_info::errno::{EINVAL, ENOMEM, ENOSYS};
use kernel_info::memory::{MAX_REGIONS, PAGE_SIZE, STACK_PAGES, USERSTACK};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_sync::IrqGuard;
use log::{debug, trace, warn};

/// Errors returned by address-space operations.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error(transparent)]
    OutOfMemory(#[from] FrameAllocError),
    #[error("address space already defines two regions")]
    TooManyRegions,
    #[error("region at {vaddr} of {size} bytes does not fit in user space")]
    InvalidRegion { vaddr: VirtualAddress, size: u32 },
    #[error("address space is already loaded")]
    AlreadyLoaded,
}

impl AddressSpaceError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory(_) => ENOMEM,
            Self::TooManyRegions => ENOSYS,
            Self::InvalidRegion { .. } | Self::AlreadyLoaded => EINVAL,
        }
    }
}

/// Permissions requested for a region. Recorded but not enforced: every
/// page is mapped read-write.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct RegionFlags {
    pub readable: bool,
    pub writeable: bool,
    pub executable: bool,
    #[bits(5)]
    _reserved: u8,
}

/// A static region as defined by the loader.
#[derive(Copy, Clone, Debug)]
pub struct Region {
    pub vbase: VirtualPage,
    pub npages: u32,
    pub flags: RegionFlags,
    /// First frame of the backing block, once loaded.
    pbase: Option<PhysicalPage>,
}

impl Region {
    #[inline]
    #[must_use]
    pub const fn pbase(&self) -> Option<PhysicalPage> {
        self.pbase
    }

    const fn segment(&self) -> Option<Segment> {
        match self.pbase {
            Some(pbase) => Some(Segment {
                vbase: self.vbase,
                pbase,
                npages: self.npages,
            }),
            None => None,
        }
    }
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    id: AddressSpaceId,
    directory: PhysicalPage,
    mapper: &'m M,
    regions: [Option<Region>; MAX_REGIONS],
    heap_start: Option<VirtualAddress>,
    heap_end: Option<VirtualAddress>,
    stack: Option<PhysicalPage>,
    loaded: bool,
}

impl<M: PhysMapper> fmt::Debug for AddressSpace<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("directory", &self.directory)
            .field("regions", &self.regions)
            .field("stack", &self.stack)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

/// First page of the fixed-size user stack.
#[inline]
#[must_use]
pub const fn stack_base() -> VirtualPage {
    VirtualPage::from_addr(VirtualAddress::new(USERSTACK - STACK_PAGES * PAGE_SIZE))
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Create an empty address space with a zeroed page directory.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if no frame is available for the
    /// directory.
    pub fn create<A: FrameAlloc + ?Sized>(
        mapper: &'m M,
        alloc: &A,
    ) -> Result<Self, AddressSpaceError> {
        let id = AddressSpaceId::next();
        let directory = alloc.allocate_single(FrameOwner::Space(id))?;
        // SAFETY: freshly allocated frame owned by this space.
        unsafe { mapper.directory_mut(directory).zero() };
        trace!("{id:?}: page directory at {directory}");

        Ok(Self {
            id,
            directory,
            mapper,
            regions: [None; MAX_REGIONS],
            heap_start: None,
            heap_end: None,
            stack: None,
            loaded: false,
        })
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> AddressSpaceId {
        self.id
    }

    /// The coremap owner tag for frames belonging to this space.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> FrameOwner {
        FrameOwner::Space(self.id)
    }

    /// Physical page of the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_page(&self) -> PhysicalPage {
        self.directory
    }

    #[inline]
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    #[inline]
    #[must_use]
    pub const fn heap_start(&self) -> Option<VirtualAddress> {
        self.heap_start
    }

    #[inline]
    #[must_use]
    pub const fn heap_end(&self) -> Option<VirtualAddress> {
        self.heap_end
    }

    /// Defined regions, in definition order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().flatten()
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn directory(&self) -> &mut PageDirectory {
        // SAFETY: the directory frame is owned by this space for its lifetime.
        unsafe { self.mapper.directory_mut(self.directory) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table(&self, page: PhysicalPage) -> &mut PageTable {
        // SAFETY: only called with frames taken from this space's directory.
        unsafe { self.mapper.table_mut(page) }
    }

    /// Record a static region.
    ///
    /// The range is widened to whole pages. Permission flags are kept for
    /// reference only. The second region fixes the heap to start on the page
    /// just past it, with an empty extent.
    ///
    /// # Errors
    /// - [`AddressSpaceError::TooManyRegions`] on a third call.
    /// - [`AddressSpaceError::InvalidRegion`] if the region is empty, reaches
    ///   into the stack or overlaps the other region.
    /// - [`AddressSpaceError::AlreadyLoaded`] after [`prepare_load`](Self::prepare_load).
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        readable: bool,
        writeable: bool,
        executable: bool,
    ) -> Result<(), AddressSpaceError> {
        if self.loaded {
            return Err(AddressSpaceError::AlreadyLoaded);
        }
        let Some(slot) = self.regions.iter().position(Option::is_none) else {
            warn!("{:?}: rejecting third region at {vaddr}", self.id);
            return Err(AddressSpaceError::TooManyRegions);
        };

        let invalid = AddressSpaceError::InvalidRegion { vaddr, size };
        let vbase = vaddr.align_down();
        let end = vaddr
            .checked_add(size)
            .and_then(VirtualAddress::align_up)
            .ok_or(invalid)?;
        if size == 0 || end > stack_base().base() {
            return Err(invalid);
        }

        let npages = (end.as_u32() - vbase.as_u32()) / PAGE_SIZE;
        let first = vbase.page();
        let last = first.add_pages(npages);
        if self
            .regions()
            .any(|r| r.vbase < last && first < r.vbase.add_pages(r.npages))
        {
            warn!("{:?}: region at {vaddr} overlaps an existing region", self.id);
            return Err(invalid);
        }
        self.regions[slot] = Some(Region {
            vbase: vbase.page(),
            npages,
            flags: RegionFlags::new()
                .with_readable(readable)
                .with_writeable(writeable)
                .with_executable(executable),
            pbase: None,
        });

        if slot == MAX_REGIONS - 1 {
            self.heap_start = Some(end);
            self.heap_end = Some(end);
        }

        debug!("{:?}: region {slot} at {vbase}, {npages} pages", self.id);
        Ok(())
    }

    /// Allocate backing storage for both regions and the stack, map every
    /// page and zero it.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if a block or a page table cannot be
    /// allocated. The space is then partially populated; the caller must
    /// [`destroy`](Self::destroy) it.
    pub fn prepare_load<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &A,
    ) -> Result<(), AddressSpaceError> {
        if self.loaded {
            return Err(AddressSpaceError::AlreadyLoaded);
        }

        for slot in 0..MAX_REGIONS {
            let Some(region) = self.regions[slot] else {
                continue;
            };
            let pbase = alloc.allocate_contiguous(region.npages as usize, self.owner())?;
            self.regions[slot] = Some(Region {
                pbase: Some(pbase),
                ..region
            });
            self.map_block(alloc, region.vbase, pbase, region.npages)?;
        }

        let stack = alloc.allocate_contiguous(STACK_PAGES as usize, self.owner())?;
        self.stack = Some(stack);
        self.map_block(alloc, stack_base(), stack, STACK_PAGES)?;

        self.loaded = true;
        debug!("{:?}: loaded, stack at {stack}", self.id);
        Ok(())
    }

    /// Hook run after the loader has filled the segments. Nothing to do.
    #[inline]
    pub const fn complete_load(&self) {}

    /// The initial user stack pointer.
    #[inline]
    #[must_use]
    pub fn define_stack(&self) -> VirtualAddress {
        debug_assert!(self.stack.is_some(), "define_stack before prepare_load");
        VirtualAddress::new(USERSTACK)
    }

    /// Install this space on the current CPU by invalidating every TLB entry.
    pub fn activate<T: Tlb + ?Sized>(&self, tlb: &mut T) {
        let _irq = IrqGuard::new();
        tlb.invalidate_all();
    }

    /// Counterpart of [`activate`](Self::activate). Nothing to do: the next
    /// activation flushes the TLB.
    #[inline]
    pub const fn deactivate(&self) {}

    /// The fixed segments of this space. Empty before
    /// [`prepare_load`](Self::prepare_load).
    #[must_use]
    pub fn segments(&self) -> SegmentTable {
        SegmentTable {
            regions: self.regions.map(|r| r.and_then(|r| r.segment())),
            stack: self.stack.map(|pbase| Segment {
                vbase: stack_base(),
                pbase,
                npages: STACK_PAGES,
            }),
        }
    }

    /// Find the second-level table covering `va`.
    ///
    /// With `create` set, a missing table is allocated through the
    /// single-frame path, zeroed and linked. The directory slot is only
    /// marked present once the frame has been obtained.
    ///
    /// Returns `Ok(None)` only when `create` is false and no table exists.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if a table is needed and none can be
    /// allocated; the directory is left unchanged.
    pub fn walk<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
        create: bool,
    ) -> Result<Option<PhysicalPage>, AddressSpaceError> {
        if create {
            self.ensure_table(alloc, va).map(Some)
        } else {
            Ok(self.find_table(va))
        }
    }

    #[inline]
    fn find_table(&self, va: VirtualAddress) -> Option<PhysicalPage> {
        self.directory().get(DirectoryIndex::from(va)).next_table()
    }

    fn ensure_table<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, AddressSpaceError> {
        let di = DirectoryIndex::from(va);
        let pd = self.directory();
        if let Some(table) = pd.get(di).next_table() {
            return Ok(table);
        }

        let table = alloc.allocate_single(self.owner())?;
        self.table(table).zero();
        pd.set(di, DirectoryEntry::table(table));
        trace!("{:?}: table for {va} at {table}", self.id);
        Ok(table)
    }

    /// The frame mapped at `va`, if any.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<PhysicalPage> {
        let table = self.find_table(va)?;
        self.table(table).get(TableIndex::from(va)).page()
    }

    /// Translate `va` through the page tables.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va).map(|frame| frame.join(va.offset()))
    }

    fn map_page<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        page: VirtualPage,
        frame: PhysicalPage,
    ) -> Result<(), AddressSpaceError> {
        let table = self.ensure_table(alloc, page.base())?;
        let pt = self.table(table);
        let ti = TableIndex::from(page.base());
        assert!(!pt.get(ti).is_present(), "{page} is already mapped");
        pt.set(ti, TableEntry::mapping(frame));
        Ok(())
    }

    fn map_block<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        vbase: VirtualPage,
        pbase: PhysicalPage,
        npages: u32,
    ) -> Result<(), AddressSpaceError> {
        for i in 0..npages {
            let frame = pbase.add_pages(i);
            // SAFETY: the block was just allocated to this space.
            unsafe { self.mapper.zero_frame(frame) };
            self.map_page(alloc, vbase.add_pages(i), frame)?;
        }
        Ok(())
    }

    /// Back the page containing `va` with a new zeroed frame.
    ///
    /// The frame comes from the single-frame path and is owned by this space;
    /// the page table is created if needed and the PTE marked present.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if either the frame or a missing
    /// page table cannot be allocated. No frame is leaked in that case.
    ///
    /// # Panics
    /// If the page is already mapped.
    pub fn materialize<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, AddressSpaceError> {
        let frame = alloc.allocate_single(self.owner())?;
        // SAFETY: freshly allocated to this space.
        unsafe { self.mapper.zero_frame(frame) };

        if let Err(e) = self.map_page(alloc, va.page(), frame) {
            alloc.free_single(frame);
            return Err(e);
        }
        trace!("{:?}: {} -> {frame}", self.id, va.page());
        Ok(frame)
    }

    /// Create a child with the same layout and a private copy of every
    /// mapped page.
    ///
    /// Every present directory slot of `self` gets a present slot in the
    /// child; every present PTE gets a present PTE at the same virtual page,
    /// backed by a distinct frame holding the same bytes.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`]; the partially built child is
    /// destroyed before returning.
    pub fn copy<A: FrameAlloc + ?Sized>(&self, alloc: &A) -> Result<Self, AddressSpaceError> {
        let mut child = Self::create(self.mapper, alloc)?;
        child.regions = self.regions.map(|r| r.map(|r| Region { pbase: None, ..r }));
        child.heap_start = self.heap_start;
        child.heap_end = self.heap_end;

        match child.copy_from(self, alloc) {
            Ok(()) => {
                debug!("{:?}: copied into {:?}", self.id, child.id);
                Ok(child)
            }
            Err(e) => {
                warn!("{:?}: copy failed: {e}", self.id);
                child.destroy(alloc);
                Err(e)
            }
        }
    }

    fn copy_from<A: FrameAlloc + ?Sized>(
        &mut self,
        parent: &Self,
        alloc: &A,
    ) -> Result<(), AddressSpaceError> {
        if parent.loaded {
            self.prepare_load(alloc)?;
        }

        for (di, parent_table) in parent.directory().tables() {
            let first = join_indices(di, TableIndex::new(0)).base();
            let child_table = self.ensure_table(alloc, first)?;

            for (ti, src) in parent.table(parent_table).mappings() {
                let existing = self.table(child_table).get(ti).page();
                let dst = match existing {
                    Some(frame) => frame,
                    None => self.materialize(alloc, join_indices(di, ti).base())?,
                };
                // SAFETY: `dst` belongs to the child, `src` to the parent.
                unsafe { self.mapper.copy_frame(dst, src) };
            }
        }
        Ok(())
    }

    /// Release every frame this space owns: single pages, segment blocks,
    /// page tables and finally the directory.
    pub fn destroy<A: FrameAlloc + ?Sized>(self, alloc: &A) {
        let segments = self.segments();

        for (_, table) in self.directory().tables() {
            for (_, frame) in self.table(table).mappings() {
                if !segments.backs(frame) {
                    alloc.free_single(frame);
                }
            }
            alloc.free_single(table);
        }

        for segment in segments.iter() {
            alloc.free_contiguous(segment.pbase);
        }

        alloc.free_single(self.directory);
        debug!("{:?}: destroyed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestFrames, TestPhys};
    use crate::tlb::{EntryHi, EntryLo, SoftTlb};
    use kernel_info::errno::ENOSYS;

    const TEXT: u32 = 0x0040_0123;
    const DATA: u32 = 0x1000_0000;

    fn loaded<'m>(phys: &'m TestPhys, frames: &TestFrames) -> AddressSpace<'m, TestPhys> {
        let mut aspace = AddressSpace::create(phys, frames).unwrap();
        aspace
            .define_region(VirtualAddress::new(TEXT), 0x2000, true, false, true)
            .unwrap();
        aspace
            .define_region(VirtualAddress::new(DATA), 0x800, true, true, false)
            .unwrap();
        aspace.prepare_load(frames).unwrap();
        aspace.complete_load();
        aspace
    }

    #[test]
    fn create_owns_a_zeroed_directory() {
        let phys = TestPhys::with_frames(4);
        phys.write(PhysicalAddress::new(0x10), &[0xAA; 4]);
        let frames = TestFrames::with_frames(4);

        let aspace = AddressSpace::create(&phys, &frames).unwrap();
        assert_eq!(aspace.directory_page(), PhysicalPage::from_number(0));
        assert_eq!(aspace.directory().tables().count(), 0);
        assert_eq!(frames.owned_by(aspace.owner()), 1);
        assert!(!aspace.is_loaded());
    }

    #[test]
    fn regions_are_page_aligned_and_fix_the_heap() {
        let phys = TestPhys::with_frames(4);
        let frames = TestFrames::with_frames(4);
        let mut aspace = AddressSpace::create(&phys, &frames).unwrap();

        aspace
            .define_region(VirtualAddress::new(TEXT), 0x2000, true, false, true)
            .unwrap();
        assert_eq!(aspace.heap_start(), None);

        aspace
            .define_region(VirtualAddress::new(DATA), 0x800, true, true, false)
            .unwrap();

        let regions: Vec<_> = aspace
            .regions()
            .map(|r| (r.vbase.base().as_u32(), r.npages))
            .collect();
        assert_eq!(regions, vec![(0x0040_0000, 3), (DATA, 1)]);
        assert_eq!(aspace.heap_start(), Some(VirtualAddress::new(0x1000_1000)));
        assert_eq!(aspace.heap_end(), aspace.heap_start());

        let flags = aspace.regions().next().unwrap().flags;
        assert!(flags.readable() && flags.executable() && !flags.writeable());

        let err = aspace
            .define_region(VirtualAddress::new(0x2000_0000), 0x1000, true, true, true)
            .unwrap_err();
        assert_eq!(err, AddressSpaceError::TooManyRegions);
        assert_eq!(err.errno(), ENOSYS);
    }

    #[test]
    fn regions_outside_user_space_are_rejected() {
        let phys = TestPhys::with_frames(4);
        let frames = TestFrames::with_frames(4);
        let mut aspace = AddressSpace::create(&phys, &frames).unwrap();

        let high = VirtualAddress::new(USERSTACK - 0x800);
        assert!(matches!(
            aspace.define_region(high, 0x1000, true, true, false),
            Err(AddressSpaceError::InvalidRegion { .. })
        ));
        assert!(matches!(
            aspace.define_region(VirtualAddress::new(0x1000), 0, true, true, false),
            Err(AddressSpaceError::InvalidRegion { .. })
        ));
        assert_eq!(aspace.regions().count(), 0);
    }

    #[test]
    fn region_reaching_into_the_stack_is_rejected() {
        let phys = TestPhys::with_frames(32);
        let frames = TestFrames::with_frames(32);
        let mut aspace = AddressSpace::create(&phys, &frames).unwrap();

        let err = aspace
            .define_region(stack_base().base(), 0x1000, true, true, false)
            .unwrap_err();
        assert!(matches!(err, AddressSpaceError::InvalidRegion { .. }));
        assert_eq!(err.errno(), EINVAL);

        let below = VirtualAddress::new(stack_base().base().as_u32() - 0x1000);
        aspace.define_region(below, 0x1000, true, true, false).unwrap();
        aspace.prepare_load(&frames).unwrap();
        assert!(aspace.lookup(below).is_some());
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let phys = TestPhys::with_frames(32);
        let frames = TestFrames::with_frames(32);
        let mut aspace = AddressSpace::create(&phys, &frames).unwrap();
        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x1800, true, false, true)
            .unwrap();

        // Starts inside the second page of the first region.
        assert!(matches!(
            aspace.define_region(VirtualAddress::new(0x0040_1800), 0x1000, true, true, false),
            Err(AddressSpaceError::InvalidRegion { .. })
        ));
        assert_eq!(aspace.regions().count(), 1);
        assert_eq!(aspace.heap_start(), None);

        // Directly adjacent is fine.
        aspace
            .define_region(VirtualAddress::new(0x0040_2000), 0x1000, true, true, false)
            .unwrap();
        aspace.prepare_load(&frames).unwrap();
        assert!(aspace.lookup(VirtualAddress::new(0x0040_2000)).is_some());
    }

    #[test]
    fn prepare_load_maps_every_segment_page_linearly() {
        let phys = TestPhys::with_frames(64);
        phys.write(PhysicalPage::from_number(1).base(), &[0xFF; 64]);
        let frames = TestFrames::with_frames(64);
        let aspace = loaded(&phys, &frames);

        assert!(aspace.is_loaded());
        assert_eq!(aspace.define_stack(), VirtualAddress::new(USERSTACK));

        // directory + three tables + 3 + 1 + 18 segment frames
        assert_eq!(frames.owned_by(aspace.owner()), 26);
        assert_eq!(aspace.directory().tables().count(), 3);

        let segments = aspace.segments();
        assert_eq!(segments.iter().count(), 3);
        for segment in segments.iter() {
            for i in 0..segment.npages {
                let va = segment.vbase.add_pages(i).base() + 0x10;
                let frame = aspace.lookup(va).unwrap();
                assert_eq!(frame, segment.pbase.add_pages(i));
                assert_eq!(aspace.translate(va), segments.translate(va));
                assert!(phys.is_zeroed(frame));
            }
        }

        let top = VirtualAddress::new(USERSTACK - 4);
        assert!(aspace.lookup(top).is_some());
        assert!(aspace.lookup(VirtualAddress::new(USERSTACK - 19 * PAGE_SIZE)).is_none());
    }

    #[test]
    fn walk_create_is_idempotent() {
        let phys = TestPhys::with_frames(8);
        let frames = TestFrames::with_frames(8);
        let aspace = AddressSpace::create(&phys, &frames).unwrap();
        let va = VirtualAddress::new(0x0123_4567);

        assert_eq!(aspace.walk(&frames, va, false).unwrap(), None);
        assert_eq!(frames.in_use(), 1);

        let created = aspace.walk(&frames, va, true).unwrap();
        assert!(created.is_some());
        assert_eq!(aspace.walk(&frames, va, false).unwrap(), created);
        assert_eq!(aspace.walk(&frames, va, true).unwrap(), created);
        assert_eq!(frames.in_use(), 2);
    }

    #[test]
    fn walk_failure_leaves_slot_absent() {
        let phys = TestPhys::with_frames(1);
        let frames = TestFrames::with_frames(1);
        let aspace = AddressSpace::create(&phys, &frames).unwrap();
        let va = VirtualAddress::new(0x0040_0000);

        let err = aspace.walk(&frames, va, true).unwrap_err();
        assert!(matches!(err, AddressSpaceError::OutOfMemory(_)));
        assert_eq!(aspace.walk(&frames, va, false).unwrap(), None);
    }

    #[test]
    fn materialize_maps_a_fresh_zeroed_frame() {
        let phys = TestPhys::with_frames(8);
        phys.write(PhysicalPage::from_number(1).base(), &[1, 2, 3]);
        let frames = TestFrames::with_frames(8);
        let aspace = AddressSpace::create(&phys, &frames).unwrap();
        let va = VirtualAddress::new(0x0050_0123);

        let frame = aspace.materialize(&frames, va).unwrap();
        assert_eq!(aspace.lookup(va), Some(frame));
        assert_eq!(frames.owner_of(frame), Some(aspace.owner()));
        assert!(phys.is_zeroed(frame));
        assert_eq!(aspace.translate(va), Some(frame.base() + 0x123));
    }

    #[test]
    fn materialize_does_not_leak_on_table_failure() {
        let phys = TestPhys::with_frames(2);
        let frames = TestFrames::with_frames(2);
        let aspace = AddressSpace::create(&phys, &frames).unwrap();

        let err = aspace
            .materialize(&frames, VirtualAddress::new(0x0040_0000))
            .unwrap_err();
        assert!(matches!(err, AddressSpaceError::OutOfMemory(_)));
        assert_eq!(frames.in_use(), 1);
    }

    #[test]
    fn copy_gives_same_layout_with_private_frames() {
        let phys = TestPhys::with_frames(128);
        let frames = TestFrames::with_frames(128);
        let parent = loaded(&phys, &frames);

        let extra = VirtualAddress::new(0x0050_0000);
        parent.materialize(&frames, extra).unwrap();
        phys.write(parent.translate(extra + 8).unwrap(), b"extra");
        let text = VirtualAddress::new(0x0040_1010);
        phys.write(parent.translate(text).unwrap(), b"text");

        let child = parent.copy(&frames).unwrap();
        assert!(child.is_loaded());
        assert_eq!(child.heap_start(), parent.heap_start());
        assert_ne!(child.id(), parent.id());

        let mut checked = 0;
        for (di, parent_table) in parent.directory().tables() {
            let child_table = child.directory().get(di).next_table();
            assert!(child_table.is_some(), "directory slot {di:?} not copied");
            for (ti, parent_frame) in parent.table(parent_table).mappings() {
                let va = join_indices(di, ti).base();
                let child_frame = child.lookup(va).unwrap();
                assert_ne!(child_frame, parent_frame);
                assert_eq!(frames.owner_of(child_frame), Some(child.owner()));
                assert_eq!(
                    phys.read(parent_frame.base(), PAGE_SIZE as usize),
                    phys.read(child_frame.base(), PAGE_SIZE as usize)
                );
                checked += 1;
            }
        }
        assert_eq!(checked, 3 + 1 + 18 + 1);
        assert_eq!(phys.read(child.translate(text).unwrap(), 4), b"text");
        assert_eq!(phys.read(child.translate(extra + 8).unwrap(), 5), b"extra");
        assert_eq!(
            frames.owned_by(child.owner()),
            frames.owned_by(parent.owner())
        );

        let (p, c) = (parent.owner(), child.owner());
        child.destroy(&frames);
        assert_eq!(frames.owned_by(c), 0);
        parent.destroy(&frames);
        assert_eq!(frames.owned_by(p), 0);
        assert_eq!(frames.in_use(), 0);
    }

    #[test]
    fn failed_copy_releases_the_child() {
        let phys = TestPhys::with_frames(40);
        let frames = TestFrames::with_frames(40);
        let parent = loaded(&phys, &frames);
        let before = frames.in_use();

        let err = parent.copy(&frames).unwrap_err();
        assert!(matches!(err, AddressSpaceError::OutOfMemory(_)));
        assert_eq!(frames.in_use(), before);
        assert_eq!(frames.owned_by(parent.owner()), before);
    }

    #[test]
    fn destroy_after_partial_load_frees_everything() {
        let phys = TestPhys::with_frames(10);
        let frames = TestFrames::with_frames(10);
        let mut aspace = AddressSpace::create(&phys, &frames).unwrap();
        aspace
            .define_region(VirtualAddress::new(TEXT), 0x100, true, false, true)
            .unwrap();

        let err = aspace.prepare_load(&frames).unwrap_err();
        assert!(matches!(err, AddressSpaceError::OutOfMemory(_)));
        assert!(!aspace.is_loaded());
        assert!(frames.in_use() > 1);

        let owner = aspace.owner();
        aspace.destroy(&frames);
        assert_eq!(frames.owned_by(owner), 0);
        assert_eq!(frames.in_use(), 0);
    }

    #[test]
    fn prepare_load_twice_is_rejected() {
        let phys = TestPhys::with_frames(64);
        let frames = TestFrames::with_frames(64);
        let mut aspace = loaded(&phys, &frames);
        assert_eq!(aspace.prepare_load(&frames), Err(AddressSpaceError::AlreadyLoaded));
        assert_eq!(
            aspace.define_region(VirtualAddress::new(0x2000_0000), 1, true, true, true),
            Err(AddressSpaceError::AlreadyLoaded)
        );
    }

    #[test]
    fn activate_flushes_the_tlb() {
        let phys = TestPhys::with_frames(4);
        let frames = TestFrames::with_frames(4);
        let aspace = AddressSpace::create(&phys, &frames).unwrap();

        let mut tlb = SoftTlb::new();
        for i in 0..5 {
            tlb.write(
                i,
                EntryHi::for_page(VirtualPage::from_number(0x400 + i as u32)),
                EntryLo::writable(PhysicalPage::from_number(i as u32)),
            );
        }
        assert_eq!(tlb.valid_entries(), 5);

        aspace.activate(&mut tlb);
        assert_eq!(tlb.valid_entries(), 0);
        aspace.deactivate();
    }
}
