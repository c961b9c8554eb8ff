//! # Virtual Memory Manager (VM) facade
//!
//! Entry points the rest of the kernel calls: bootstrap, kernel page
//! allocation, address-space creation, on-demand pages and the TLB fault
//! path.
//!
//! Before [`Vm::bootstrap`] kernel pages come from a [`RamStealer`] behind a
//! spin lock (the only one in the subsystem, since threads do not exist yet).
//! Afterwards every request goes to the [`Coremap`].
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::coremap::RamLayout;
//! use kernel_alloc::phys_mapper::Kseg0PhysMapper;
//! use kernel_alloc::vm::Vm;
//! use kernel_alloc::eviction::NoEviction;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! static MAPPER: Kseg0PhysMapper = Kseg0PhysMapper;
//! static VM: Vm<'static, Kseg0PhysMapper> = Vm::new(
//!     &MAPPER,
//!     RamLayout::new(PhysicalAddress::new(0x0004_0000), PhysicalAddress::new(0x0080_0000)),
//! );
//!
//! let early = VM.alloc_kpages(1)?;
//! unsafe { VM.bootstrap(NoEviction)? };
//! let buffer = VM.alloc_kpages(4)?;
//! VM.free_kpages(buffer);
//! VM.free_kpages(early); // stolen memory is never returned
//! # Ok::<(), kernel_alloc::vm::VmError>(())
//! ```

use crate::coremap::{Coremap, RamLayout};
use crate::eviction::{EvictionPolicy, NoEviction};
use crate::phys_mapper::{kvaddr_to_paddr, paddr_to_kvaddr};
use crate::steal::RamStealer;
use kernel_info::errno::{EINVAL, ENOMEM};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_sync::{SetOnce, SpinLock};
use kernel_vmem::fault::handle_fault;
use kernel_vmem::{
    AddressSpace, AddressSpaceError, FaultContext, FaultError, FrameAlloc, FrameAllocError,
    FrameOwner, PhysMapper, Tlb,
};
use log::{debug, trace};

/// Errors surfaced by the VM facade.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    AddressSpace(#[from] AddressSpaceError),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error("cannot steal {requested} pages before bootstrap")]
    StealExhausted { requested: usize },
    #[error("coremap for {frames} frames leaves no allocatable memory")]
    CoremapTooLarge { frames: usize },
    #[error("VM system not bootstrapped")]
    NotBootstrapped,
    #[error("VM system already bootstrapped")]
    AlreadyBootstrapped,
}

impl VmError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::Frames(e) => e.errno(),
            Self::AddressSpace(e) => e.errno(),
            Self::Fault(e) => e.errno(),
            Self::StealExhausted { .. } | Self::CoremapTooLarge { .. } => ENOMEM,
            Self::NotBootstrapped | Self::AlreadyBootstrapped => EINVAL,
        }
    }
}

pub struct Vm<'m, M: PhysMapper, E: EvictionPolicy = NoEviction> {
    mapper: &'m M,
    stealer: SpinLock<RamStealer>,
    coremap: SetOnce<Coremap<'m, E>>,
}

impl<'m, M: PhysMapper, E: EvictionPolicy> Vm<'m, M, E> {
    /// A VM system over `layout` that steals pages until bootstrapped.
    #[must_use]
    pub const fn new(mapper: &'m M, layout: RamLayout) -> Self {
        Self {
            mapper,
            stealer: SpinLock::new(RamStealer::new(layout)),
            coremap: SetOnce::new(),
        }
    }

    /// Build the coremap over the RAM not yet stolen. Stolen pages become
    /// FIXED.
    ///
    /// # Safety
    /// RAM from the stealer's current position to the end of the layout must
    /// be unused and reachable through the mapper for `'m`.
    ///
    /// # Errors
    /// [`VmError::AlreadyBootstrapped`] on a second call,
    /// [`VmError::CoremapTooLarge`] if no RAM would remain.
    pub unsafe fn bootstrap(&self, policy: E) -> Result<(), VmError> {
        let stealer = self.stealer.lock();
        if self.coremap.get().is_some() {
            return Err(VmError::AlreadyBootstrapped);
        }
        // SAFETY: forwarded to the caller.
        let coremap = unsafe { Coremap::bootstrap(self.mapper, stealer.remaining(), policy)? };
        self.coremap
            .set(coremap)
            .map_err(|_| VmError::AlreadyBootstrapped)
    }

    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.coremap.get().is_some()
    }

    /// The frame allocator.
    ///
    /// # Errors
    /// [`VmError::NotBootstrapped`] before [`bootstrap`](Self::bootstrap).
    pub fn coremap(&self) -> Result<&Coremap<'m, E>, VmError> {
        self.coremap.get().ok_or(VmError::NotBootstrapped)
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Allocate `npages` physically contiguous pages for the kernel and
    /// return their KSEG0 address.
    ///
    /// # Errors
    /// [`VmError::StealExhausted`] before bootstrap, [`VmError::Frames`]
    /// afterwards.
    pub fn alloc_kpages(&self, npages: usize) -> Result<VirtualAddress, VmError> {
        let frame = match self.coremap.get() {
            Some(coremap) => coremap.allocate_contiguous(npages, FrameOwner::Kernel)?,
            None => self.steal(npages)?,
        };
        Ok(paddr_to_kvaddr(frame.base()))
    }

    fn steal(&self, npages: usize) -> Result<PhysicalPage, VmError> {
        {
            let mut stealer = self.stealer.lock();
            // Re-checked under the lock: bootstrap may have won the race.
            if self.coremap.get().is_none() {
                return stealer
                    .steal(npages)
                    .ok_or(VmError::StealExhausted { requested: npages });
            }
        }
        Ok(self
            .coremap()?
            .allocate_contiguous(npages, FrameOwner::Kernel)?)
    }

    /// Free the block of kernel pages starting at `kva`.
    ///
    /// Pages stolen before bootstrap cannot be returned; freeing them is a
    /// no-op.
    ///
    /// # Panics
    /// If `kva` is not a page-aligned KSEG0 address, or not the start of an
    /// allocated block.
    pub fn free_kpages(&self, kva: VirtualAddress) {
        let Some(pa) = kvaddr_to_paddr(kva) else {
            panic!("free_kpages: {kva} is not a KSEG0 address");
        };
        assert!(pa.is_page_aligned(), "free_kpages: {kva} is not page aligned");

        let Some(coremap) = self.coremap.get() else {
            trace!("free_kpages: {kva} before bootstrap, leaked");
            return;
        };
        if coremap.is_fixed(pa.page()) {
            trace!("free_kpages: {kva} was stolen at boot, ignored");
            return;
        }
        coremap.free_contiguous(pa.page());
    }

    /// A fresh, empty address space.
    ///
    /// # Errors
    /// [`VmError::NotBootstrapped`], or out of memory for the directory.
    pub fn create_address_space(&self) -> Result<AddressSpace<'m, M>, VmError> {
        Ok(AddressSpace::create(self.mapper, self.coremap()?)?)
    }

    /// Allocate a zeroed frame for `aspace` and map it at `va`.
    ///
    /// # Errors
    /// [`VmError::NotBootstrapped`], or out of memory.
    pub fn allocate_single_for_address_space(
        &self,
        aspace: &AddressSpace<'_, M>,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, VmError> {
        Ok(self.coremap()?.allocate_single_for_address_space(aspace, va)?)
    }

    /// Trap-layer entry for TLB misses; see [`handle_fault`].
    ///
    /// # Errors
    /// [`VmError::Fault`]; its [`errno`](VmError::errno) is what the trap
    /// layer reports.
    pub fn fault<C, T>(
        &self,
        ctx: &C,
        tlb: &mut T,
        fault_type: u32,
        address: VirtualAddress,
    ) -> Result<PhysicalPage, VmError>
    where
        C: FaultContext + ?Sized,
        T: Tlb + ?Sized,
    {
        handle_fault(ctx, tlb, fault_type, address).map_err(|e| {
            debug!("vm: fault type {fault_type} at {address} failed: {e}");
            VmError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coremap::FrameState;
    use crate::test_support::{TestPhys, install_host_threads};
    use kernel_info::errno::EFAULT;
    use kernel_info::memory::{MIPS_KSEG0, PAGE_SIZE};
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::fault::{VM_FAULT_READ, VM_FAULT_WRITE};
    use kernel_vmem::{SegmentTable, SoftTlb};

    const KERNEL_FRAMES: u32 = 4;

    fn vm(phys: &TestPhys, frames: u32) -> Vm<'_, TestPhys> {
        install_host_threads();
        Vm::new(
            phys,
            RamLayout::new(
                PhysicalAddress::new(KERNEL_FRAMES * PAGE_SIZE),
                PhysicalAddress::new(frames * PAGE_SIZE),
            ),
        )
    }

    fn kseg0(frame: u32) -> VirtualAddress {
        VirtualAddress::new(MIPS_KSEG0 + frame * PAGE_SIZE)
    }

    #[test]
    fn pages_are_stolen_until_bootstrap() {
        let phys = TestPhys::with_frames(64);
        let vm = vm(&phys, 64);

        assert_eq!(vm.alloc_kpages(2), Ok(kseg0(KERNEL_FRAMES)));
        assert_eq!(vm.alloc_kpages(1), Ok(kseg0(KERNEL_FRAMES + 2)));
        assert_eq!(vm.coremap().err(), Some(VmError::NotBootstrapped));

        unsafe { vm.bootstrap(NoEviction) }.unwrap();
        let coremap = vm.coremap().unwrap();
        for frame in 0..KERNEL_FRAMES + 3 {
            assert!(coremap.is_fixed(PhysicalPage::from_number(frame)));
        }

        // The coremap itself sits right after the stolen pages.
        let kva = vm.alloc_kpages(1).unwrap();
        assert!(kva > kseg0(KERNEL_FRAMES + 3));
        let frame = kvaddr_to_paddr(kva).unwrap().page();
        assert_eq!(coremap.descriptor(frame).unwrap().state, FrameState::InUse);
    }

    #[test]
    fn stealing_past_end_of_ram_fails() {
        let phys = TestPhys::with_frames(8);
        let vm = vm(&phys, 8);
        let err = vm.alloc_kpages(5).unwrap_err();
        assert_eq!(err, VmError::StealExhausted { requested: 5 });
        assert_eq!(err.errno(), ENOMEM);
        assert!(vm.alloc_kpages(4).is_ok());
    }

    #[test]
    fn second_bootstrap_is_rejected() {
        let phys = TestPhys::with_frames(32);
        let vm = vm(&phys, 32);
        unsafe { vm.bootstrap(NoEviction) }.unwrap();
        assert_eq!(
            unsafe { vm.bootstrap(NoEviction) },
            Err(VmError::AlreadyBootstrapped)
        );
    }

    #[test]
    fn kernel_pages_round_trip_through_kseg0() {
        let phys = TestPhys::with_frames(64);
        let vm = vm(&phys, 64);
        let stolen = vm.alloc_kpages(1).unwrap();
        unsafe { vm.bootstrap(NoEviction) }.unwrap();
        let coremap = vm.coremap().unwrap();
        let before = coremap.stats();

        let kva = vm.alloc_kpages(3).unwrap();
        assert_eq!(coremap.stats().in_use, 3);
        vm.free_kpages(kva);
        vm.free_kpages(stolen);
        assert_eq!(coremap.stats(), before);
    }

    #[test]
    fn out_of_memory_after_bootstrap_maps_to_enomem() {
        let phys = TestPhys::with_frames(32);
        let vm = vm(&phys, 32);
        unsafe { vm.bootstrap(NoEviction) }.unwrap();
        let err = vm.alloc_kpages(32).unwrap_err();
        assert_eq!(
            err,
            VmError::Frames(FrameAllocError::OutOfMemory { requested: 32 })
        );
        assert_eq!(err.errno(), ENOMEM);
    }

    #[test]
    #[should_panic(expected = "not a KSEG0 address")]
    fn free_of_user_address_panics() {
        let phys = TestPhys::with_frames(32);
        let vm = vm(&phys, 32);
        vm.free_kpages(VirtualAddress::new(0x0040_0000));
    }

    #[test]
    #[should_panic(expected = "not page aligned")]
    fn free_of_unaligned_address_panics() {
        let phys = TestPhys::with_frames(32);
        let vm = vm(&phys, 32);
        vm.free_kpages(VirtualAddress::new(MIPS_KSEG0 + 0x10));
    }

    struct Current<'a, 'm> {
        aspace: Option<&'a AddressSpace<'m, TestPhys>>,
    }

    impl FaultContext for Current<'_, '_> {
        fn has_current_process(&self) -> bool {
            true
        }

        fn current_segments(&self) -> Option<SegmentTable> {
            self.aspace.map(AddressSpace::segments)
        }
    }

    #[test]
    fn loaded_address_space_resolves_faults() {
        let phys = TestPhys::with_frames(128);
        let vm = vm(&phys, 128);
        unsafe { vm.bootstrap(NoEviction) }.unwrap();

        let mut aspace = vm.create_address_space().unwrap();
        aspace
            .define_region(VirtualAddress::new(0x0040_0000), 0x2000, true, false, true)
            .unwrap();
        aspace
            .define_region(VirtualAddress::new(0x1000_0000), 0x1000, true, true, false)
            .unwrap();
        aspace.prepare_load(vm.coremap().unwrap()).unwrap();
        aspace.complete_load();

        let mut tlb = SoftTlb::new();
        aspace.activate(&mut tlb);
        let ctx = Current {
            aspace: Some(&aspace),
        };

        let va = VirtualAddress::new(0x0040_1234);
        let frame = vm.fault(&ctx, &mut tlb, VM_FAULT_READ, va).unwrap();
        assert_eq!(aspace.lookup(va), Some(frame));

        let stack = aspace.define_stack();
        let top = VirtualAddress::new(stack.as_u32() - 4);
        let frame = vm.fault(&ctx, &mut tlb, VM_FAULT_WRITE, top).unwrap();
        assert_eq!(aspace.lookup(top), Some(frame));
        assert_eq!(tlb.valid_entries(), 2);

        let err = vm
            .fault(&ctx, &mut tlb, VM_FAULT_READ, VirtualAddress::new(0x2000_0000))
            .unwrap_err();
        assert_eq!(err.errno(), EFAULT);

        let heap = vm
            .allocate_single_for_address_space(&aspace, VirtualAddress::new(0x1000_1000))
            .unwrap();
        assert!(phys.is_zeroed(heap));

        let coremap = vm.coremap().unwrap();
        let owner = aspace.owner();
        aspace.destroy(coremap);
        assert_eq!(coremap.frames_owned_by(owner), 0);
    }

    #[test]
    fn copied_address_space_owns_distinct_frames() {
        let phys = TestPhys::with_frames(160);
        let vm = vm(&phys, 160);
        unsafe { vm.bootstrap(NoEviction) }.unwrap();
        let coremap = vm.coremap().unwrap();

        let mut parent = vm.create_address_space().unwrap();
        parent
            .define_region(VirtualAddress::new(0x0040_0000), 0x1000, true, false, true)
            .unwrap();
        parent.prepare_load(coremap).unwrap();
        let text = VirtualAddress::new(0x0040_0000);
        phys.write(parent.translate(text).unwrap(), b"fork me");

        let child = parent.copy(coremap).unwrap();
        let child_text = child.translate(text).unwrap();
        assert_ne!(child_text, parent.translate(text).unwrap());
        assert_eq!(phys.read(child_text, 7), b"fork me");
        assert_eq!(
            coremap.frames_owned_by(child.owner()),
            coremap.frames_owned_by(parent.owner())
        );

        let (p, c) = (parent.owner(), child.owner());
        parent.destroy(coremap);
        child.destroy(coremap);
        assert_eq!(coremap.frames_owned_by(p) + coremap.frames_owned_by(c), 0);
    }
}
