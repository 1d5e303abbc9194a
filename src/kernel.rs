//! The state the kernel sets up once at boot and shares from then on.

use core::ops::Range;

use shared::SysInfo;

use crate::{
    bcache::BufferCache,
    block::BlockDevice,
    mem::{PageAllocator, PhysicalAddress},
    param::CacheConfig,
};

/// The physical page allocator and the buffer cache, set up together at boot.
///
/// There is exactly one of these for the life of the kernel. Everything that needs memory or
/// disk blocks gets a shared reference to it.
///
/// The page allocator is borrowed rather than owned: its bookkeeping grows with the amount of
/// memory managed, so it belongs in a `static` built by [`PageAllocator::new`], never on a stack.
pub struct Kernel<'a, D: BlockDevice, const NPAGES: usize> {
    /// Physical pages for page tables, kernel stacks and user memory.
    pub pages: &'a PageAllocator<NPAGES>,
    /// The cache in front of the root disk.
    pub bcache: BufferCache<D>,
}
impl<'a, D: BlockDevice, const NPAGES: usize> Kernel<'a, D, NPAGES> {
    /// Hand `free_ram` to `pages` and put a buffer cache in front of `disk`.
    ///
    /// # Safety
    /// `free_ram` must satisfy the requirements of [`PageAllocator::init`].
    pub unsafe fn boot(
        pages: &'a PageAllocator<NPAGES>,
        free_ram: Range<PhysicalAddress>,
        disk: D,
        config: CacheConfig,
    ) -> Self {
        // SAFETY: By the function precondition.
        unsafe { pages.init(free_ram) };
        let bcache = BufferCache::new(disk, config);
        log::info!("Kernel resources ready");
        Self { pages, bcache }
    }

    /// Gather the system information reported to user space.
    ///
    /// The process table lives outside this crate, so the caller counts live processes.
    pub fn sysinfo(&self, process_count: u64) -> SysInfo {
        SysInfo {
            free_memory: self.pages.free_memory_bytes() as u64,
            process_count,
        }
    }
}
