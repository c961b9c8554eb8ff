//! # KSEG0-based PhysMapper
//!
//! On MIPS the first 512 MiB of physical memory are permanently visible at
//! `MIPS_KSEG0 + pa`, cached and without TLB involvement. Kernel buffers,
//! page directories, page tables and the coremap are all reached through
//! this window, so turning a physical address into a pointer is a single
//! addition.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::Kseg0PhysMapper;
//! use kernel_memory_addresses::PhysicalPage;
//! use kernel_vmem::PhysMapper;
//!
//! let table = PhysicalPage::from_number(0x1F3);
//! unsafe { Kseg0PhysMapper.table_mut(table).zero() };
//! ```

use kernel_info::memory::{MIPS_KSEG0, MIPS_KSEG0_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// Kernel virtual address of `pa` in the direct-mapped segment.
///
/// # Panics
/// If `pa` lies above the 512 MiB KSEG0 window.
#[inline]
#[must_use]
pub const fn paddr_to_kvaddr(pa: PhysicalAddress) -> VirtualAddress {
    assert!(pa.as_u32() < MIPS_KSEG0_SIZE, "physical address outside KSEG0");
    VirtualAddress::new(pa.as_u32() + MIPS_KSEG0)
}

/// Physical address behind a KSEG0 address, `None` for any other address.
#[inline]
#[must_use]
pub const fn kvaddr_to_paddr(va: VirtualAddress) -> Option<PhysicalAddress> {
    match va.as_u32().checked_sub(MIPS_KSEG0) {
        Some(pa) if pa < MIPS_KSEG0_SIZE => Some(PhysicalAddress::new(pa)),
        _ => None,
    }
}

/// [`PhysMapper`] for the KSEG0 direct map.
///
/// # Safety
/// Only meaningful when running on the target: the returned references
/// point into the KSEG0 window of the current CPU.
#[derive(Debug, Default, Copy, Clone)]
pub struct Kseg0PhysMapper;

impl PhysMapper for Kseg0PhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = paddr_to_kvaddr(pa).as_u32() as usize as *mut T;
        // SAFETY: caller guarantees `pa` is RAM holding a `T`.
        unsafe { &mut *va }
    }
}
