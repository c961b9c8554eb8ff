//! # Kernel Memory Configuration
//!
//! Compile-time constants that fix the machine's virtual memory layout and the
//! error codes the VM subsystem reports to the trap and syscall layers. Every
//! crate that needs a layout constant takes it from here, so the allocator, the
//! page-table code and the fault handler agree on a single source of truth.
//!
//! ## Virtual Memory Architecture
//!
//! The target is a 32-bit MIPS-style machine with a software-refilled TLB:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   kuseg: user space (TLB mapped)│
//!             │   region 1, region 2, heap      │
//!             │              ...                │
//!             │   user stack (grows down)       │
//! USERSTACK   ├─────────────────────────────────┤ 0x8000_0000
//!             │   kseg0: direct-mapped kernel   │
//!             │   kvaddr = paddr + MIPS_KSEG0   │
//! 0xA000_0000 ├─────────────────────────────────┤
//!             │   kseg1 / kseg2 (unused here)   │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! User translations are two-level: a 1024-entry page directory indexed by
//! bits 31–22 and 1024-entry page tables indexed by bits 21–12.
//!
//! ## Modules
//!
//! * [`memory`]: layout, paging and TLB constants.
//! * [`errno`]: error numbers returned across the trap boundary.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod errno;
pub mod memory;
