//! # Kernel Memory Allocation
//!
//! Physical frame allocation and the kernel-facing entry points of the
//! virtual memory system for a 32-bit MIPS machine.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  VM facade (vm)                     │
//! │    • bootstrap, alloc_kpages / free_kpages          │
//! │    • address-space creation, on-demand pages        │
//! │    • TLB fault entry                                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Coremap (coremap) / RAM stealer (steal)      │
//! │    • one descriptor per 4 KiB frame                 │
//! │    • FREE / FIXED / IN-USE with block ids           │
//! │    • eviction hook (eviction)                       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │            KSEG0 direct map (phys_mapper)           │
//! │    • kvaddr = paddr + 0x8000_0000                   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Coremap ([`coremap`])
//!
//! * **Placement**: lives in RAM directly after the memory the kernel used
//!   during boot; those frames and its own are FIXED.
//! * **Contiguous runs**: first fit from a rotating free-pointer, rescanned
//!   once from frame 0, never a partial run.
//! * **Ownership**: every in-use frame records whether it belongs to the
//!   kernel or to one address space.
//!
//! Implements [`kernel_vmem::FrameAlloc`], so address spaces draw their
//! tables, segment blocks and on-demand pages from it.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! Physical memory below 512 MiB is always visible through KSEG0. The
//! coremap, page directories and page tables are accessed that way.
//!
//! ## Memory Layout Integration
//!
//! ```text
//! Virtual Address Space Layout:
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   kuseg: user space (TLB)       │
//!             │   regions, heap, stack ↓        │
//! USERSTACK   ├─────────────────────────────────┤ 0x8000_0000
//!             │   kseg0: direct map, cached     │
//!             │   (kernel, coremap, tables)     │
//!             ├─────────────────────────────────┤ 0xA000_0000
//!             │   kseg1 / kseg2                 │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! The coremap is shared by every CPU and protected by three sleeping locks
//! taken in a fixed order (see [`coremap`]). The stealer is protected by a
//! spin lock because it runs before threads exist.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod coremap;
pub mod eviction;
pub mod phys_mapper;
pub mod steal;
pub mod vm;

#[cfg(test)]
mod test_support;

pub use crate::coremap::{
    BlockId, Coremap, CoremapStats, FrameDescriptor, FrameState, RamLayout,
};
pub use crate::eviction::{EvictionPolicy, NoEviction};
pub use crate::vm::{Vm, VmError};
