//! Physical memory management.
//!
//! See [`PageAllocator`] for how pages are handed out and shared.

mod cow;
mod page;

pub use page::PageAllocator;

pub use crate::param::PAGE_SIZE;

/// The physical address of some byte of memory.
///
/// The kernel identity-maps physical memory, so an address can also be used as a pointer to the
/// memory it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(pub usize);
impl PhysicalAddress {
    /// Check whether `self` is aligned to a given alignment.
    pub fn is_aligned(self, align: usize) -> bool {
        self.0.is_multiple_of(align)
    }

    /// Round up to the start of the next page, unless already page-aligned.
    pub fn page_round_up(self) -> Self {
        Self(self.0.next_multiple_of(PAGE_SIZE))
    }

    /// Round down to the start of the page containing this address.
    pub fn page_round_down(self) -> Self {
        Self(self.0 - self.0 % PAGE_SIZE)
    }

    /// Get a pointer to the memory at this address.
    ///
    /// The pointer picks up whatever provenance was exposed for this address, so it is only
    /// valid to use if this memory was handed to the kernel through an exposed pointer.
    pub fn as_ptr<T>(self) -> *mut T {
        core::ptr::with_exposed_provenance_mut(self.0)
    }
}
impl core::fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
