//! Details shared between kernel-space and user-space.

#![no_std]

use bytemuck::{Pod, Zeroable};

/// System information reported to user space.
///
/// The layout is fixed so the kernel can copy the record into user memory byte for byte, and a
/// user program can read it back with [`bytemuck::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SysInfo {
    /// Bytes of physical memory currently on the free list.
    pub free_memory: u64,
    /// Number of processes that are not in the unused state.
    pub process_count: u64,
}
impl SysInfo {
    /// View the record as the bytes that get copied out to user space.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Possible kinds of errors from kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorKind {
    /// The system is out of memory.
    OutOfMemory = 1,
    /// Generic I/O error.
    Io = 2,
}
impl ErrorKind {
    /// Get the error kind from a number.
    #[must_use]
    pub fn from_num(num: u32) -> Option<Self> {
        Some(match num {
            1 => Self::OutOfMemory,
            2 => Self::Io,
            _ => return None,
        })
    }
}
impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::OutOfMemory => "Out of memory",
            Self::Io => "I/O Error",
        })
    }
}
