//! Buffers and the handles given out for them.

use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use util::cell::SyncUnsafeCell;

use crate::{
    bcache::BufferCache,
    block::{BlockDevice, BlockId},
    param::BLOCK_SIZE,
    sync::{KSleepLock, KSleepLockGuard},
};

/// One slot of the buffer pool.
pub(super) struct Buffer {
    /// Binding, validity, count and chain link.
    ///
    /// Only touched while holding the lock of the bucket whose chain contains this buffer (see
    /// [`super::bucket::LockedBucket`]).
    pub(super) meta: SyncUnsafeCell<BufferMeta>,
    /// The cached block contents.
    pub(super) data: KSleepLock<[u8; BLOCK_SIZE]>,
}
impl Buffer {
    pub(super) fn new() -> Self {
        Self {
            meta: SyncUnsafeCell::new(BufferMeta {
                binding: None,
                valid: false,
                refcnt: 0,
                next: None,
            }),
            data: KSleepLock::new([0; BLOCK_SIZE]),
        }
    }
}

/// Bookkeeping for a buffer, guarded by its bucket's lock.
pub(super) struct BufferMeta {
    /// The block this buffer caches, or `None` if it has never been used.
    pub(super) binding: Option<BlockId>,
    /// Whether the payload has been read from the device since the buffer was bound.
    pub(super) valid: bool,
    /// Number of guards and pins outstanding. Buffers with a nonzero count are never evicted.
    pub(super) refcnt: u32,
    /// The next buffer in the same bucket.
    pub(super) next: Option<usize>,
}
impl BufferMeta {
    /// Point this (unused) buffer at a new block, with one reference for the caller.
    pub(super) fn rebind(&mut self, id: BlockId) -> Option<BlockId> {
        debug_assert_eq!(self.refcnt, 0, "Rebinding a buffer that is in use");
        self.valid = false;
        self.refcnt = 1;
        self.binding.replace(id)
    }
}

/// Exclusive access to one cached block.
///
/// Returned by [`BufferCache::acquire`] and [`BufferCache::read`]. While it exists no one else can
/// touch the payload, and the buffer can't be evicted. Dropping it (or passing it to
/// [`BufferCache::release`]) unlocks the payload and then drops the reference.
pub struct BufferGuard<'a, D: BlockDevice> {
    pub(super) cache: &'a BufferCache<D>,
    pub(super) slot: usize,
    pub(super) id: BlockId,
    /// Dropped by hand so it unlocks before the reference count goes down.
    pub(super) data: ManuallyDrop<KSleepLockGuard<'a, [u8; BLOCK_SIZE]>>,
}
impl<'a, D: BlockDevice> BufferGuard<'a, D> {
    pub(super) fn new(
        cache: &'a BufferCache<D>,
        slot: usize,
        id: BlockId,
        data: KSleepLockGuard<'a, [u8; BLOCK_SIZE]>,
    ) -> Self {
        Self {
            cache,
            slot,
            id,
            data: ManuallyDrop::new(data),
        }
    }

    /// The block this buffer holds.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The device number of the block.
    pub fn device(&self) -> u32 {
        self.id.device
    }

    /// The block number on the device.
    pub fn block(&self) -> u32 {
        self.id.block
    }
}
impl<D: BlockDevice> Deref for BufferGuard<'_, D> {
    type Target = [u8; BLOCK_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
impl<D: BlockDevice> DerefMut for BufferGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}
impl<D: BlockDevice> Drop for BufferGuard<'_, D> {
    fn drop(&mut self) {
        // SAFETY:
        // We're being dropped, so `data` is never used again.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.drop_reference(self.slot, self.id, "release");
    }
}

/// A reference that keeps a block cached without holding its payload lock.
///
/// The log layer pins blocks it has modified so they stay in memory until they are installed.
/// Hand it back to [`BufferCache::unpin`] when done.
#[must_use = "a pin keeps its buffer from ever being evicted until passed to `unpin`"]
pub struct BufferPin<'a, D: BlockDevice> {
    pub(super) cache: &'a BufferCache<D>,
    pub(super) slot: usize,
    pub(super) id: BlockId,
}
impl<D: BlockDevice> BufferPin<'_, D> {
    /// The block this pin keeps cached.
    pub fn id(&self) -> BlockId {
        self.id
    }
}

/// What a buffer looked like at one moment, from [`BufferCache::snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferState {
    /// Index of the buffer in the pool.
    pub slot: usize,
    /// The bucket whose chain held the buffer.
    pub bucket: usize,
    /// The block the buffer was bound to.
    pub binding: Option<BlockId>,
    /// Whether the contents had been read from the device.
    pub valid: bool,
    /// Number of outstanding guards and pins.
    pub refcnt: u32,
}
