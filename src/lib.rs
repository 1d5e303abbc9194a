//! Resource management for a small teaching kernel.
//!
//! Two shared services live here:
//!
//! - [`mem::PageAllocator`] hands out 4 KiB physical pages and counts how many address spaces
//!   map each one, so that forked processes can share pages until one of them writes.
//! - [`bcache::BufferCache`] keeps copies of disk blocks in memory and gives one caller at a time
//!   access to each block.
//!
//! Both are built once at boot as part of a [`Kernel`] and used concurrently from then on.
//! Misusing either (freeing a page twice, committing a buffer not held) is a kernel bug and halts
//! with a logged message; running out of pages is reported to the caller.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bcache;
pub mod block;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod mem;
pub mod param;
pub mod proc;
pub mod sync;

pub use bcache::{BufferCache, BufferGuard, BufferPin, BufferState};
pub use block::{BlockDevice, BlockId, RamDisk};
pub use error::{Error, ErrorKind, OutOfMemory, Result};
pub use kernel::Kernel;
pub use mem::{PageAllocator, PhysicalAddress};
pub use param::CacheConfig;
pub use shared::SysInfo;
