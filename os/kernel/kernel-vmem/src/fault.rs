//! # TLB Miss Handling
//!
//! Every user segment is fixed at load time and mapped linearly onto one
//! contiguous block, so a miss is resolved from the [`SegmentTable`] alone:
//!
//! 1. Decode the fault type. Read-only faults cannot happen because every
//!    page is mapped writable; seeing one is fatal.
//! 2. Without a current process or address space the fault is unresolvable
//!    (early boot).
//! 3. Find the segment containing the page and compute the frame by offset.
//! 4. With interrupts masked, reuse a valid entry for the same page or take
//!    the first invalid slot and write `(VPN, PFN | dirty | valid)`.
//!
//! There is no replacement policy. A full TLB fails the fault.

use crate::segment::SegmentTable;
use crate::tlb::{EntryHi, EntryLo, Tlb};
use kernel_info::errno::{EFAULT, EINVAL};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_sync::IrqGuard;
use log::{debug, trace, warn};

/// Raw fault code for a load miss.
pub const VM_FAULT_READ: u32 = 0;
/// Raw fault code for a store miss.
pub const VM_FAULT_WRITE: u32 = 1;
/// Raw fault code for a store to a page whose entry lacks the dirty bit.
pub const VM_FAULT_READONLY: u32 = 2;

/// Classification of a TLB fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultKind {
    Read,
    Write,
    ReadOnly,
}

impl TryFrom<u32> for FaultKind {
    type Error = FaultError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(Self::Read),
            VM_FAULT_WRITE => Ok(Self::Write),
            VM_FAULT_READONLY => Ok(Self::ReadOnly),
            other => Err(FaultError::InvalidFaultType(other)),
        }
    }
}

/// Why a fault could not be resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("unknown fault type {0}")]
    InvalidFaultType(u32),
    #[error("fault with no current process")]
    NoProcess,
    #[error("fault with no current address space")]
    NoAddressSpace,
    #[error("{0} is outside every segment")]
    BadAddress(VirtualAddress),
    #[error("ran out of TLB entries")]
    TlbFull,
}

impl FaultError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidFaultType(_) => EINVAL,
            Self::NoProcess | Self::NoAddressSpace | Self::BadAddress(_) | Self::TlbFull => EFAULT,
        }
    }
}

/// What the fault handler needs to know about the faulting thread.
pub trait FaultContext {
    /// Whether a user process is current on this CPU.
    fn has_current_process(&self) -> bool;

    /// Segments of the current process's address space, or `None` if the
    /// process has no address space.
    fn current_segments(&self) -> Option<SegmentTable>;
}

/// Resolve a TLB miss at `address` and program a translation.
///
/// Returns the frame now mapped at the faulting page.
///
/// # Errors
/// See [`FaultError`]; each maps to an errno via [`FaultError::errno`].
///
/// # Panics
/// On a read-only fault.
pub fn handle_fault<C, T>(
    ctx: &C,
    tlb: &mut T,
    fault_type: u32,
    address: VirtualAddress,
) -> Result<PhysicalPage, FaultError>
where
    C: FaultContext + ?Sized,
    T: Tlb + ?Sized,
{
    let kind = FaultKind::try_from(fault_type)?;
    let page = address.page();
    debug!("fault: {address} ({kind:?})");

    if kind == FaultKind::ReadOnly {
        panic!("read-only fault at {address}: all user pages are writable");
    }

    if !ctx.has_current_process() {
        return Err(FaultError::NoProcess);
    }
    let segments = ctx.current_segments().ok_or(FaultError::NoAddressSpace)?;

    let frame = segments
        .translate(page.base())
        .ok_or(FaultError::BadAddress(address))?
        .page();

    let hi = EntryHi::for_page(page);
    let lo = EntryLo::writable(frame);

    let _irq = IrqGuard::new();
    let Some(slot) = tlb.probe(page).or_else(|| tlb.first_free()) else {
        warn!("ran out of TLB entries, cannot handle fault at {address}");
        return Err(FaultError::TlbFull);
    };
    tlb.write(slot, hi, lo);
    trace!("fault: {page} -> {frame} in slot {slot}");
    Ok(frame)
}
