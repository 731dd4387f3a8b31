//! Keystone Guards - syscall enforcement
//!
//! [`SyscallGate`] is the choke point every privileged call passes through;
//! [`Syscall`] is the ABI table mapping raw syscall numbers to the capability
//! each requires.

#![forbid(unsafe_code)]

/// Enforcement gate
pub mod gate;

/// Syscall ABI table
pub mod syscall;

pub use gate::{Allowance, SyscallGate};
pub use syscall::Syscall;
