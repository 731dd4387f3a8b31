//! Syscall table
//!
//! Raw syscall numbers form the kernel ABI. Each maps to exactly one
//! capability; numbers outside the table are rejected before any token
//! lookup.

use keystone_core::Capability;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Privileged syscalls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum Syscall {
    /// Write to the kernel log
    Log = 0x01,
    /// Read the system clock
    GetTime = 0x02,
    /// Write into vault-backed secure memory
    SecureWrite = 0x03,
    /// Spawn a task in the calling module
    ModSpawn = 0x04,
    /// Read from the entropy pool
    ReadEntropy = 0x05,
    /// Send an IPC message
    IpcSend = 0x06,
    /// Receive an IPC message
    IpcReceive = 0x07,
    /// Send on a network interface
    NetSend = 0x08,
    /// Allocate memory beyond the initial budget
    MemAlloc = 0x09,
    /// Write to persistent storage
    StorageWrite = 0x0A,
    /// Load another module
    ModLoad = 0x0B,
}

impl Syscall {
    /// Every syscall in ABI order
    pub const ALL: [Syscall; 11] = [
        Syscall::Log,
        Syscall::GetTime,
        Syscall::SecureWrite,
        Syscall::ModSpawn,
        Syscall::ReadEntropy,
        Syscall::IpcSend,
        Syscall::IpcReceive,
        Syscall::NetSend,
        Syscall::MemAlloc,
        Syscall::StorageWrite,
        Syscall::ModLoad,
    ];

    /// Decode a raw syscall number
    pub fn from_raw(raw: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.raw() == raw)
    }

    /// Raw ABI number
    pub const fn raw(self) -> u64 {
        self as u64
    }

    /// Capability the caller's token must grant
    pub const fn required_capability(self) -> Capability {
        match self {
            Syscall::Log => Capability::IO,
            Syscall::GetTime | Syscall::ModSpawn => Capability::CoreExec,
            Syscall::SecureWrite => Capability::SecureMem,
            Syscall::ReadEntropy => Capability::Crypto,
            Syscall::IpcSend | Syscall::IpcReceive => Capability::IPC,
            Syscall::NetSend => Capability::Network,
            Syscall::MemAlloc => Capability::MemoryAlloc,
            Syscall::StorageWrite => Capability::Storage,
            Syscall::ModLoad => Capability::ModuleLoad,
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({:#x})", self.raw())
    }
}
