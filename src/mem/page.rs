//! Page-based allocation routines.

use core::ops::{Deref, DerefMut, Range};

use util::cell::OnceLock;

use crate::{
    error::{OutOfMemory, Result, fatal, fatal_assert},
    mem::{PAGE_SIZE, PhysicalAddress},
    param::{ALLOC_FILL, FREE_POISON},
    sync::{KSpinLock, KSpinLockGuard},
};

/// Hands out physical pages and tracks how many mappings share each one.
///
/// Every page in the managed range has a reference count. A count of zero means the page is on
/// the free list; one means a single owner may write it in place; more than one means it's shared
/// copy-on-write and must be duplicated (see [`Self::duplicate_on_write`]) before a write.
///
/// # Locking
/// The reference counts and the free list have separate locks, so adjusting a count never waits
/// on a push or pop. When both are held, the reference-count lock is always taken first: the only
/// way to lock the free list while holding the counts is [`LockedCounts::free_list`].
///
/// # Placement
/// The bookkeeping is stored inline, eight bytes per page. At realistic sizes that is far too big
/// for a kernel stack, so build the allocator in a `static` with [`Self::new`] and hand out
/// references to it.
pub struct PageAllocator<const NPAGES: usize> {
    /// The page-aligned range of memory being managed, set once by [`Self::init`].
    range: OnceLock<Range<PhysicalAddress>>,
    /// The reference count of each page, indexed from the start of [`Self::range`].
    ref_counts: KSpinLock<[u32; NPAGES]>,
    /// Pages with a reference count of zero.
    free_list: KSpinLock<FreeList<NPAGES>>,
}
impl<const NPAGES: usize> PageAllocator<NPAGES> {
    /// Create an allocator with no memory to hand out yet.
    ///
    /// `NPAGES` is the most pages [`Self::init`] will accept.
    #[must_use]
    pub const fn new() -> Self {
        assert!(
            NPAGES < NIL as usize,
            "Page indices must fit in a free list link"
        );
        Self {
            range: OnceLock::new(),
            // Until `init` frees them, every page belongs to whoever booted us.
            ref_counts: KSpinLock::new([1; NPAGES]),
            free_list: KSpinLock::new(FreeList::new()),
        }
    }

    /// Hand every page in `free_ram` to the allocator.
    ///
    /// The bounds are rounded inward to whole pages. Each page is then passed through
    /// [`Self::release`], which puts it on the free list.
    ///
    /// # Safety
    /// The memory in `free_ram` must be valid for reads and writes through
    /// [`PhysicalAddress::as_ptr`], and nothing else may use it (outside of pages later handed out
    /// by this allocator) for as long as the allocator exists.
    pub unsafe fn init(&self, free_ram: Range<PhysicalAddress>) {
        let start = free_ram.start.page_round_up();
        let end = free_ram.end.page_round_down().max(start);
        let num_pages = (end.0 - start.0) / PAGE_SIZE;
        fatal_assert!(
            num_pages <= NPAGES,
            "Page allocator holds at most {NPAGES} pages, given {num_pages}"
        );
        if self.range.set(start..end).is_err() {
            fatal!("Page allocator initialized twice");
        }
        log::info!("Managing {num_pages} pages of physical memory at {start}..{end}");
        for index in 0..num_pages {
            self.release(self.address_of(index));
        }
    }

    /// Allocate one page.
    ///
    /// The page comes back filled with [`ALLOC_FILL`] and with a reference count of one. Running
    /// out of pages is not fatal; callers must pass the error on.
    pub fn allocate(&self) -> Result<PhysicalAddress, OutOfMemory> {
        let index = self.free_list.lock().pop().ok_or(OutOfMemory)?;
        let page = self.address_of(index);
        // SAFETY:
        // The page just left the free list, so no one else holds a reference to it.
        unsafe { fill_page(page, ALLOC_FILL) };
        let mut counts = self.ref_counts.lock();
        debug_assert_eq!(counts[index], 0, "Page on free list was still referenced");
        counts[index] = 1;
        Ok(page)
    }

    /// Drop one reference to a page, freeing it once no references remain.
    ///
    /// Freed pages are filled with [`FREE_POISON`] before going back on the free list.
    ///
    /// Passing an address this allocator didn't hand out, or one that's already free, is a bug in
    /// the caller and halts the kernel.
    pub fn release(&self, page: PhysicalAddress) {
        let index = self.index_of(page, "release");
        let mut counts = self.lock_counts();
        fatal_assert!(counts[index] > 0, "release: page {page} is already free");
        counts[index] -= 1;
        if counts[index] == 0 {
            // SAFETY:
            // That was the last reference, so no one else can be using the page.
            unsafe { fill_page(page, FREE_POISON) };
            counts.free_list().push(index);
        }
    }

    /// Add a reference to a page that's already in use.
    ///
    /// This is how a page becomes shared copy-on-write: the fork path maps the same page into a
    /// second address space and calls this once for the new mapping.
    pub fn share(&self, page: PhysicalAddress) {
        let index = self.index_of(page, "share");
        let mut counts = self.lock_counts();
        fatal_assert!(counts[index] > 0, "share: page {page} is not allocated");
        let Some(count) = counts[index].checked_add(1) else {
            fatal!("share: reference count of page {page} overflowed");
        };
        counts[index] = count;
    }

    /// Get the current reference count of a page.
    pub fn ref_count(&self, page: PhysicalAddress) -> u32 {
        let index = self.index_of(page, "ref_count");
        self.ref_counts.lock()[index]
    }

    /// Get the number of bytes on the free list.
    ///
    /// This walks the whole list, so keep it off hot paths.
    pub fn free_memory_bytes(&self) -> usize {
        self.free_list.lock().len() * PAGE_SIZE
    }

    /// Lock the reference counts.
    pub(super) fn lock_counts(&self) -> LockedCounts<'_, NPAGES> {
        LockedCounts {
            allocator: self,
            counts: self.ref_counts.lock(),
        }
    }

    /// Get the range of memory being managed.
    fn managed(&self) -> &Range<PhysicalAddress> {
        match self.range.get() {
            Some(range) => range,
            None => fatal!("Page allocator used before init"),
        }
    }

    /// Get the index of a page, halting if it isn't a page this allocator manages.
    pub(super) fn index_of(&self, page: PhysicalAddress, operation: &str) -> usize {
        let range = self.managed();
        fatal_assert!(
            page.is_aligned(PAGE_SIZE) && range.contains(&page),
            "{operation}: {page} is not a page in {}..{}",
            range.start,
            range.end
        );
        (page.0 - range.start.0) / PAGE_SIZE
    }

    /// Get the address of the page at an index.
    pub(super) fn address_of(&self, index: usize) -> PhysicalAddress {
        PhysicalAddress(self.managed().start.0 + index * PAGE_SIZE)
    }
}
impl<const NPAGES: usize> Default for PageAllocator<NPAGES> {
    fn default() -> Self {
        Self::new()
    }
}

/// The reference counts of one [`PageAllocator`], locked.
pub(super) struct LockedCounts<'a, const NPAGES: usize> {
    allocator: &'a PageAllocator<NPAGES>,
    counts: KSpinLockGuard<'a, [u32; NPAGES]>,
}
impl<'a, const NPAGES: usize> LockedCounts<'a, NPAGES> {
    /// Lock the same allocator's free list, after its counts.
    pub(super) fn free_list(&self) -> KSpinLockGuard<'a, FreeList<NPAGES>> {
        self.allocator.free_list.lock()
    }
}
impl<const NPAGES: usize> Deref for LockedCounts<'_, NPAGES> {
    type Target = [u32; NPAGES];
    fn deref(&self) -> &Self::Target {
        &self.counts
    }
}
impl<const NPAGES: usize> DerefMut for LockedCounts<'_, NPAGES> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.counts
    }
}

/// Link value marking the end of the free list.
const NIL: u32 = u32::MAX;

/// A stack of free pages, linked by index.
///
/// The links live beside the pages rather than inside them, so freed memory holds nothing but the
/// poison pattern.
pub(super) struct FreeList<const NPAGES: usize> {
    /// The most recently freed page, or [`NIL`].
    head: u32,
    /// For each free page, the page freed before it, or [`NIL`].
    next: [u32; NPAGES],
}
impl<const NPAGES: usize> FreeList<NPAGES> {
    const fn new() -> Self {
        Self {
            head: NIL,
            next: [NIL; NPAGES],
        }
    }

    fn push(&mut self, index: usize) {
        self.next[index] = self.head;
        self.head = index as u32;
    }

    pub(super) fn pop(&mut self) -> Option<usize> {
        if self.head == NIL {
            return None;
        }
        let index = self.head as usize;
        self.head = core::mem::replace(&mut self.next[index], NIL);
        Some(index)
    }

    fn len(&self) -> usize {
        let link = |index: u32| (index != NIL).then_some(index);
        core::iter::successors(link(self.head), |&index| link(self.next[index as usize])).count()
    }
}

/// Overwrite a whole page with one byte.
///
/// # Safety
/// `page` must be a page of managed memory that nothing else is accessing.
unsafe fn fill_page(page: PhysicalAddress, byte: u8) {
    // SAFETY:
    // By the function precondition, we may write the whole page.
    unsafe { page.as_ptr::<u8>().write_bytes(byte, PAGE_SIZE) };
}
