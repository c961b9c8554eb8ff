//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and page bases used
//! by the two-level paging code.
//!
//! ## Overview
//!
//! The machine this crate targets has a 32-bit address space and a single page
//! size of 4 KiB. Every address splits into a 20-bit page number and a 12-bit
//! in-page offset:
//!
//! ```text
//!  31                                12 11              0
//! ┌────────────────────────────────────┬────────────────┐
//! │            page number             │     offset     │
//! └────────────────────────────────────┴────────────────┘
//! ```
//!
//! | Concept | Description |
//! |----------|-------------|
//! | [`MemoryAddress`] | A raw 32-bit address, either physical or virtual. |
//! | [`PageOffset`] | An offset within a 4 KiB page (`0..4096`). |
//! | [`VirtualAddress`] / [`VirtualPage`] | Refer to translated (user or kernel) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage`] | Refer to RAM frames. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//! let (page, off) = va.split();
//! assert_eq!(page.base().as_u32(), 0x0040_1000);
//! assert_eq!(off.as_u32(), 0x234);
//! assert_eq!(page.join(off), va);
//!
//! let frame = PhysicalPage::from_number(5);
//! assert_eq!(frame.base().as_u32(), 5 * PAGE_SIZE);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`.
//! - All alignment and offset calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod page_offset;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use page_offset::PageOffset;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]); the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE - 1);

const _: () = {
    assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
    assert!(PAGE_FRAME == 0xFFFF_F000);
};
