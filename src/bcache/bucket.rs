//! Hash buckets and the order their locks are taken in.

use alloc::vec::Vec;

use crate::{
    bcache::buffer::{Buffer, BufferMeta},
    block::BlockId,
    error::{fatal, fatal_assert},
    sync::{KSpinLock, KSpinLockGuard},
};

/// The head of one bucket's chain of buffers.
///
/// The chain continues through [`BufferMeta::next`].
pub(super) struct Bucket {
    head: Option<usize>,
}
impl Bucket {
    pub(super) const fn empty() -> Self {
        Self { head: None }
    }
}

/// A bucket whose lock is held.
///
/// Holding the lock grants access to the metadata of every buffer in the chain, which is how all
/// buffer metadata gets read or written.
pub(super) struct LockedBucket<'a> {
    chain: KSpinLockGuard<'a, Bucket>,
    buffers: &'a [Buffer],
}
impl<'a> LockedBucket<'a> {
    /// Lock a bucket on its own.
    ///
    /// Never call this while holding another bucket's lock; use [`AllBuckets::lock`] for that.
    pub(super) fn lock(bucket: &'a KSpinLock<Bucket>, buffers: &'a [Buffer]) -> Self {
        Self {
            chain: bucket.lock(),
            buffers,
        }
    }

    /// Get the metadata of a buffer in this chain, without checking membership.
    ///
    /// # Safety
    /// `slot` must be in this bucket's chain.
    unsafe fn member(&self, slot: usize) -> &BufferMeta {
        // SAFETY:
        // Members of the chain are only accessed under this bucket's lock, which we hold.
        unsafe { &*self.buffers[slot].meta.get() }
    }

    /// Get the mutable metadata of a buffer in this chain, without checking membership.
    ///
    /// # Safety
    /// `slot` must be in this bucket's chain, or in no chain while every bucket lock is held.
    unsafe fn member_mut(&mut self, slot: usize) -> &mut BufferMeta {
        // SAFETY:
        // As for `member`, and the exclusive borrow of `self` keeps this the only reference made
        // through this bucket.
        unsafe { &mut *self.buffers[slot].meta.get() }
    }

    /// Walk the chain, yielding each buffer's slot and metadata.
    pub(super) fn members(&self) -> impl Iterator<Item = (usize, &BufferMeta)> + '_ {
        core::iter::successors(self.chain.head, move |&slot| {
            // SAFETY: `slot` came from walking the chain.
            unsafe { self.member(slot) }.next
        })
        .map(move |slot| {
            // SAFETY: `slot` came from walking the chain.
            (slot, unsafe { self.member(slot) })
        })
    }

    /// Get the metadata of a buffer, which must be in this chain.
    pub(super) fn meta(&self, slot: usize) -> &BufferMeta {
        fatal_assert!(
            self.members().any(|(member, _)| member == slot),
            "Buffer {slot} is not in the locked bucket"
        );
        // SAFETY: We just checked membership.
        unsafe { self.member(slot) }
    }

    /// Get the mutable metadata of a buffer, which must be in this chain.
    pub(super) fn meta_mut(&mut self, slot: usize) -> &mut BufferMeta {
        fatal_assert!(
            self.members().any(|(member, _)| member == slot),
            "Buffer {slot} is not in the locked bucket"
        );
        // SAFETY: We just checked membership.
        unsafe { self.member_mut(slot) }
    }

    /// Find the buffer bound to `id`, if it's in this chain.
    pub(super) fn find_bound(&self, id: BlockId) -> Option<usize> {
        self.members()
            .find(|(_, meta)| meta.binding == Some(id))
            .map(|(slot, _)| slot)
    }

    /// Find a buffer in this chain that no one references.
    pub(super) fn find_unused(&self) -> Option<usize> {
        self.members()
            .find(|(_, meta)| meta.refcnt == 0)
            .map(|(slot, _)| slot)
    }

    /// Add a buffer to the front of the chain.
    ///
    /// # Safety
    /// `slot` must not be in any chain, and no one else may be able to reach its metadata: either
    /// the cache isn't shared yet, or every bucket lock is held.
    pub(super) unsafe fn push(&mut self, slot: usize) {
        let head = self.chain.head;
        // SAFETY: By the function precondition.
        unsafe { self.member_mut(slot) }.next = head;
        self.chain.head = Some(slot);
    }

    /// Remove a buffer from the chain.
    fn unlink(&mut self, slot: usize) {
        if self.chain.head == Some(slot) {
            // SAFETY: `slot` is the head of the chain.
            self.chain.head = unsafe { self.member_mut(slot) }.next.take();
            return;
        }
        let Some((prev, _)) = self.members().find(|(_, meta)| meta.next == Some(slot)) else {
            fatal!("Buffer {slot} is not in the bucket it is being unlinked from");
        };
        // SAFETY: `prev` links to `slot`, so both are in the chain.
        let next = unsafe { self.member_mut(slot) }.next.take();
        // SAFETY: As above.
        unsafe { self.member_mut(prev) }.next = next;
    }
}

/// Every bucket lock plus the eviction lock, taken in the one order that avoids deadlock.
///
/// Cross-bucket eviction needs several buckets at once. If two callers locked them in the order
/// they happened to need them, each could end up holding a bucket the other is waiting on. Taking
/// all of them in ascending index order, and the eviction lock last, gives every caller the same
/// order.
pub(super) struct AllBuckets<'a> {
    // Field order is drop order: the eviction lock goes first, then buckets ascending.
    _evict: KSpinLockGuard<'a, ()>,
    buckets: Vec<LockedBucket<'a>>,
}
impl<'a> AllBuckets<'a> {
    /// Lock all of `buckets` in ascending order, then `evict`.
    ///
    /// The caller must hold none of these locks already.
    pub(super) fn lock(
        buckets: &'a [KSpinLock<Bucket>],
        evict: &'a KSpinLock<()>,
        buffers: &'a [Buffer],
    ) -> Self {
        // Allocate before locking anything.
        let mut locked = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            locked.push(LockedBucket::lock(bucket, buffers));
        }
        Self {
            _evict: evict.lock(),
            buckets: locked,
        }
    }

    pub(super) fn bucket(&self, index: usize) -> &LockedBucket<'a> {
        &self.buckets[index]
    }

    pub(super) fn bucket_mut(&mut self, index: usize) -> &mut LockedBucket<'a> {
        &mut self.buckets[index]
    }

    /// Iterate over the locked buckets in index order.
    pub(super) fn iter(&self) -> impl Iterator<Item = &LockedBucket<'a>> {
        self.buckets.iter()
    }

    /// Move a buffer from one bucket's chain to another's.
    pub(super) fn move_buffer(&mut self, slot: usize, from: usize, to: usize) {
        self.buckets[from].unlink(slot);
        // SAFETY:
        // `slot` was just unlinked, and we hold every bucket lock.
        unsafe { self.buckets[to].push(slot) };
    }
}
