//! Resolving copy-on-write faults.

use crate::{
    error::{OutOfMemory, Result, fatal},
    mem::{PAGE_SIZE, PageAllocator, PhysicalAddress},
};

impl<const NPAGES: usize> PageAllocator<NPAGES> {
    /// Get a page the caller may write to in place of `page`.
    ///
    /// If `page` is shared, this copies it into a fresh page, drops the caller's reference to the
    /// original, and returns the copy. If the caller is the only owner, `page` comes straight back
    /// without allocating or copying.
    ///
    /// Running out of memory here halts the kernel. Use [`Self::try_duplicate_on_write`] to handle
    /// it instead.
    pub fn duplicate_on_write(&self, page: PhysicalAddress) -> PhysicalAddress {
        match self.try_duplicate_on_write(page) {
            Ok(page) => page,
            Err(OutOfMemory) => fatal!("duplicate_on_write: out of memory copying page {page}"),
        }
    }

    /// Like [`Self::duplicate_on_write`], but running out of memory is reported to the caller.
    ///
    /// On error, every reference count is left as it was.
    pub fn try_duplicate_on_write(
        &self,
        page: PhysicalAddress,
    ) -> Result<PhysicalAddress, OutOfMemory> {
        let index = self.index_of(page, "duplicate_on_write");
        let mut counts = self.lock_counts();
        match counts[index] {
            0 => fatal!("duplicate_on_write: page {page} is not mapped by anyone"),
            1 => return Ok(page),
            _ => {}
        }
        let copy_index = counts.free_list().pop().ok_or(OutOfMemory)?;
        let copy = self.address_of(copy_index);
        // SAFETY:
        // `copy` just left the free list, so we have it to ourselves. `page` is still referenced
        // by the caller and at least one other mapping, so it can't be freed while we read it.
        unsafe {
            core::ptr::copy_nonoverlapping(page.as_ptr::<u8>(), copy.as_ptr::<u8>(), PAGE_SIZE);
        };
        counts[copy_index] = 1;
        counts[index] -= 1;
        log::debug!("Copied shared page {page} to {copy}");
        Ok(copy)
    }
}
