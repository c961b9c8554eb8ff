//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_FRAME, PAGE_SHIFT, PAGE_SIZE};

/// Base of the direct-mapped kernel segment.
/// Physical address `pa` is visible to the kernel at [`MIPS_KSEG0`] + `pa`.
pub const MIPS_KSEG0: u32 = 0x8000_0000;

/// Size of the direct-mapped kernel segment (512 MiB).
pub const MIPS_KSEG0_SIZE: u32 = 0x2000_0000;

/// Top of the user stack. The stack occupies the pages immediately below.
pub const USERSTACK: u32 = MIPS_KSEG0;

/// Number of pages in the fixed-size user stack.
pub const STACK_PAGES: u32 = 18;

/// Number of slots in the hardware TLB.
pub const NUM_TLB: usize = 64;

/// Maximum number of static regions an address space may define.
pub const MAX_REGIONS: usize = 2;

/// Entries in a page directory.
pub const PD_ENTRIES: usize = 1024;

/// Entries in a second-level page table.
pub const PT_ENTRIES: usize = 1024;

/// Shift selecting the directory index (bits 31–22).
pub const PD_SHIFT: u32 = 22;

/// Mask applied to a virtual address to extract the directory index bits.
pub const PD_MASK: u32 = 0xFFC0_0000;

/// Mask applied to a virtual address to extract the table index bits.
pub const PT_MASK: u32 = 0x003F_F000;

const _: () = {
    assert!(USERSTACK.is_multiple_of(PAGE_SIZE));
    assert!(USERSTACK > STACK_PAGES * PAGE_SIZE);
    assert!(PD_ENTRIES * 4 == PAGE_SIZE as usize);
    assert!(PT_ENTRIES * 4 == PAGE_SIZE as usize);
    assert!(PD_MASK | PT_MASK | (PAGE_SIZE - 1) == u32::MAX);
    assert!(PD_MASK >> PD_SHIFT == (PD_ENTRIES as u32) - 1);
    assert!(PT_MASK >> PAGE_SHIFT == (PT_ENTRIES as u32) - 1);
};
