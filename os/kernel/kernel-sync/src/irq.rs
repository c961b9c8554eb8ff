//! # Interrupt priority control
//!
//! The VM code raises the interrupt priority level around the short
//! read-modify-write of a TLB entry so a timer interrupt cannot re-enter the
//! translation code halfway through. The platform layer installs an
//! [`InterruptControl`] implementation once at boot; before that, raising the
//! priority is a no-op, which is correct while only one CPU runs with
//! interrupts still masked by the boot code.

use crate::SetOnce;

/// An interrupt priority level.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ipl(u8);

impl Ipl {
    /// All interrupts enabled.
    pub const NONE: Self = Self(0);
    /// All interrupts masked.
    pub const HIGH: Self = Self(1);

    #[inline]
    #[must_use]
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }
}

/// Platform hooks for raising and restoring the interrupt priority level.
pub trait InterruptControl: Sync {
    /// Raises the priority to [`Ipl::HIGH`] and returns the previous level.
    fn splhigh(&self) -> Ipl;

    /// Restores a level previously returned by [`splhigh`](Self::splhigh).
    fn splx(&self, ipl: Ipl);
}

static CONTROL: SetOnce<&'static dyn InterruptControl> = SetOnce::new();

/// Installs the platform's interrupt controller.
///
/// # Errors
/// Returns the rejected controller if one was already installed.
pub fn install(
    ctrl: &'static dyn InterruptControl,
) -> Result<(), &'static dyn InterruptControl> {
    CONTROL.set(ctrl)
}

/// RAII guard that masks interrupts on creation and restores the previous
/// priority level on drop.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::IrqGuard;
///
/// {
///     let _g = IrqGuard::new();
///     // TLB read-modify-write
/// }
/// ```
pub struct IrqGuard {
    /// Level to restore, or `None` if no controller was installed.
    previous: Option<Ipl>,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            previous: CONTROL.get().map(|ctrl| ctrl.splhigh()),
        }
    }

    /// The priority level that was active before this guard was created.
    #[inline]
    #[must_use]
    pub const fn previous(&self) -> Option<Ipl> {
        self.previous
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if let (Some(ipl), Some(ctrl)) = (self.previous, CONTROL.get()) {
            ctrl.splx(ipl);
        }
    }
}
