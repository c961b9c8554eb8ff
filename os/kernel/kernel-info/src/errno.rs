//! # Error Numbers
//!
//! The subset of kernel error numbers the VM subsystem produces. Values match
//! the kernel's `errno` table so trap and syscall code can pass them through
//! unchanged.

/// Function not implemented (also used for "too many regions").
pub const ENOSYS: i32 = 1;

/// Out of memory.
pub const ENOMEM: i32 = 3;

/// Bad memory reference.
pub const EFAULT: i32 = 6;

/// Invalid argument.
pub const EINVAL: i32 = 8;
