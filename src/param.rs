//! Kernel-wide sizing parameters.

/// The size of a single page of physical memory.
pub const PAGE_SIZE: usize = 4096;

/// The size of a disk block, and so of each buffer cache payload.
pub const BLOCK_SIZE: usize = 1024;

/// Largest number of blocks any single file system operation writes.
pub const MAX_OP_BLOCKS: usize = 10;

/// Default number of buffers in the buffer cache.
pub const NBUF: usize = MAX_OP_BLOCKS * 3;

/// Default number of hash buckets in the buffer cache.
///
/// A prime, so that strided block numbers still spread across buckets.
pub const NBUCKET: usize = 13;

/// Byte written over a page when it is handed out by the allocator.
///
/// Code that reads a fresh page before writing it sees this pattern instead of stale data.
pub const ALLOC_FILL: u8 = 0x05;

/// Byte written over a page when it goes back on the free list.
///
/// Distinct from [`ALLOC_FILL`] so a dangling reference to freed memory is recognizable.
pub const FREE_POISON: u8 = 0x01;

/// Sizing of the buffer cache, chosen at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of buffers in the pool.
    pub buffers: usize,
    /// Number of hash buckets the buffers are spread over.
    pub buckets: usize,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            buffers: NBUF,
            buckets: NBUCKET,
        }
    }
}
