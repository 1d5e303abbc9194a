//! The block buffer cache.
//!
//! A fixed pool of buffers, each holding a copy of one disk block, shared by everything that
//! reads or writes the disk. Caching cuts down on device transfers, and routing every access
//! through one buffer per block serializes concurrent users of that block.
//!
//! # Structure
//! Buffers are spread over hash buckets by block number. Each bucket has a spin lock guarding its
//! chain of buffers and their metadata (binding, validity and reference count). The payload of
//! each buffer has its own sleep lock, which may be held across device I/O.
//!
//! # Lock order
//! A caller holds at most one bucket lock at a time, except while evicting across buckets. That
//! path takes every bucket lock in ascending order and then the eviction lock (see
//! [`bucket::AllBuckets`]). Payload locks are never taken while a bucket lock is held.

mod bucket;
mod buffer;

use alloc::{boxed::Box, vec::Vec};
use core::ptr;

pub use buffer::{BufferGuard, BufferPin, BufferState};

use crate::{
    bcache::{
        bucket::{AllBuckets, Bucket, LockedBucket},
        buffer::Buffer,
    },
    block::{BlockDevice, BlockId, Direction},
    error::{fatal, fatal_assert},
    param::{BLOCK_SIZE, CacheConfig},
    sync::KSpinLock,
};

/// A cache of disk blocks in front of one block device.
pub struct BufferCache<D: BlockDevice> {
    device: D,
    buffers: Box<[Buffer]>,
    buckets: Box<[KSpinLock<Bucket>]>,
    /// Taken after every bucket lock while moving buffers between buckets.
    evict_lock: KSpinLock<()>,
}

/// How [`BufferCache::claim`] found a buffer.
enum Claim {
    /// The block was already cached.
    Hit,
    /// An unused buffer in the block's own bucket was rebound.
    Local { previous: Option<BlockId> },
    /// An unused buffer was taken from another bucket.
    Stolen {
        from: usize,
        previous: Option<BlockId>,
    },
}

impl<D: BlockDevice> BufferCache<D> {
    /// Build a cache over `device` with the pool sized by `config`.
    ///
    /// Buffer `i` starts in bucket `i % config.buckets`, bound to no block.
    pub fn new(device: D, config: CacheConfig) -> Self {
        fatal_assert!(
            config.buffers > 0 && config.buckets > 0,
            "Buffer cache needs at least one buffer and one bucket, given {config:?}"
        );
        let buffers: Box<[Buffer]> = core::iter::repeat_with(Buffer::new)
            .take(config.buffers)
            .collect();
        let buckets: Box<[KSpinLock<Bucket>]> =
            core::iter::repeat_with(|| KSpinLock::new(Bucket::empty()))
                .take(config.buckets)
                .collect();
        for slot in 0..buffers.len() {
            let mut bucket = LockedBucket::lock(&buckets[slot % buckets.len()], &buffers);
            // SAFETY:
            // The cache isn't shared yet, and each slot is pushed exactly once.
            unsafe { bucket.push(slot) };
        }
        log::info!(
            "Buffer cache: {} buffers of {BLOCK_SIZE} bytes in {} buckets",
            config.buffers,
            config.buckets
        );
        Self {
            device,
            buffers,
            buckets,
            evict_lock: KSpinLock::new(()),
        }
    }

    /// Get the device this cache reads from and writes to.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Get exclusive access to the buffer for a block, without reading it.
    ///
    /// Waits for any other holder of the same block to release it. The contents are whatever the
    /// buffer last held; call [`Self::load_if_invalid`] (or use [`Self::read`]) to make sure they
    /// match the disk.
    ///
    /// Halts the kernel if every buffer is in use.
    #[must_use]
    pub fn acquire(&self, device: u32, block: u32) -> BufferGuard<'_, D> {
        let id = BlockId { device, block };
        let (slot, claim) = self.claim(id);
        match claim {
            Claim::Hit => log::trace!("Block {id} found in buffer {slot}"),
            Claim::Local { previous } => {
                log::trace!("Block {id} bound to buffer {slot}, previously {previous:?}");
            }
            Claim::Stolen { from, previous } => log::debug!(
                "Block {id} bound to buffer {slot} taken from bucket {from}, previously {previous:?}"
            ),
        }
        let data = self.buffers[slot].data.lock();
        BufferGuard::new(self, slot, id, data)
    }

    /// Find or bind the buffer for `id` and take a reference to it.
    fn claim(&self, id: BlockId) -> (usize, Claim) {
        let home = self.home_of(id);
        {
            let mut bucket = self.lock_bucket(home);
            if let Some(slot) = bucket.find_bound(id) {
                bucket.meta_mut(slot).refcnt += 1;
                return (slot, Claim::Hit);
            }
            if let Some(slot) = bucket.find_unused() {
                let previous = bucket.meta_mut(slot).rebind(id);
                return (slot, Claim::Local { previous });
            }
        }

        let mut all = self.lock_all();
        // Someone may have bound the block, or freed a buffer here, while no lock was held.
        if let Some(slot) = all.bucket(home).find_bound(id) {
            all.bucket_mut(home).meta_mut(slot).refcnt += 1;
            return (slot, Claim::Hit);
        }
        if let Some(slot) = all.bucket(home).find_unused() {
            let previous = all.bucket_mut(home).meta_mut(slot).rebind(id);
            return (slot, Claim::Local { previous });
        }
        let victim = all
            .iter()
            .enumerate()
            .filter(|&(index, _)| index != home)
            .find_map(|(index, bucket)| bucket.find_unused().map(|slot| (index, slot)));
        let Some((from, slot)) = victim else {
            fatal!("acquire: no free buffers for block {id}");
        };
        all.move_buffer(slot, from, home);
        let previous = all.bucket_mut(home).meta_mut(slot).rebind(id);
        (slot, Claim::Stolen { from, previous })
    }

    /// Read the block from the device unless the buffer already holds its contents.
    pub fn load_if_invalid(&self, guard: &mut BufferGuard<'_, D>) {
        self.check_owner(guard, "load_if_invalid");
        let home = self.home_of(guard.id);
        if self.lock_bucket(home).meta(guard.slot).valid {
            return;
        }
        let id = guard.id;
        self.transfer(Direction::Read, id, &mut **guard);
        self.lock_bucket(home).meta_mut(guard.slot).valid = true;
    }

    /// Get exclusive access to a block, with its contents read from the disk if not cached.
    #[must_use]
    pub fn read(&self, device: u32, block: u32) -> BufferGuard<'_, D> {
        let mut guard = self.acquire(device, block);
        self.load_if_invalid(&mut guard);
        guard
    }

    /// Write the buffer's contents to the disk, returning once the device has them.
    pub fn commit(&self, guard: &mut BufferGuard<'_, D>) {
        self.check_owner(guard, "commit");
        let id = guard.id;
        self.transfer(Direction::Write, id, &mut **guard);
    }

    /// Give up access to a buffer.
    ///
    /// Same as dropping the guard, except that a guard from a different cache halts the kernel.
    pub fn release(&self, guard: BufferGuard<'_, D>) {
        self.check_owner(&guard, "release");
        drop(guard);
    }

    /// Keep a buffer from being evicted after its guard is released.
    pub fn pin(&self, guard: &BufferGuard<'_, D>) -> BufferPin<'_, D> {
        self.check_owner(guard, "pin");
        self.lock_bucket(self.home_of(guard.id))
            .meta_mut(guard.slot)
            .refcnt += 1;
        BufferPin {
            cache: self,
            slot: guard.slot,
            id: guard.id,
        }
    }

    /// Let a pinned buffer be evicted again.
    pub fn unpin(&self, pin: BufferPin<'_, D>) {
        fatal_assert!(
            ptr::eq(pin.cache, self),
            "unpin: pin on block {} belongs to another cache",
            pin.id
        );
        self.drop_reference(pin.slot, pin.id, "unpin");
    }

    /// List the state of every buffer, ordered by slot.
    ///
    /// Takes every bucket lock, so the listing is consistent.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BufferState> {
        let mut states = Vec::with_capacity(self.buffers.len());
        let all = self.lock_all();
        for (bucket, locked) in all.iter().enumerate() {
            states.extend(locked.members().map(|(slot, meta)| BufferState {
                slot,
                bucket,
                binding: meta.binding,
                valid: meta.valid,
                refcnt: meta.refcnt,
            }));
        }
        drop(all);
        states.sort_unstable_by_key(|state| state.slot);
        states
    }

    /// Drop one reference to the buffer in `slot`, which holds `id`.
    fn drop_reference(&self, slot: usize, id: BlockId, operation: &str) {
        let mut bucket = self.lock_bucket(self.home_of(id));
        let meta = bucket.meta_mut(slot);
        fatal_assert!(
            meta.refcnt > 0,
            "{operation}: buffer for block {id} has no references left"
        );
        meta.refcnt -= 1;
    }

    /// Halt unless `guard` came from this cache.
    ///
    /// A [`BufferGuard`] owns its payload lock for as long as it exists, so holding one already
    /// proves the lock is held. Only which cache it belongs to needs checking.
    fn check_owner(&self, guard: &BufferGuard<'_, D>, operation: &str) {
        fatal_assert!(
            ptr::eq(guard.cache, self),
            "{operation}: buffer for block {} is not held from this cache",
            guard.id
        );
    }

    fn transfer(&self, direction: Direction, id: BlockId, data: &mut [u8; BLOCK_SIZE]) {
        if let Err(e) = self.device.transfer(direction, id, data) {
            fatal!("Disk {direction:?} of block {id} failed: {e}");
        }
    }

    fn home_of(&self, id: BlockId) -> usize {
        id.block as usize % self.buckets.len()
    }

    fn lock_bucket(&self, index: usize) -> LockedBucket<'_> {
        LockedBucket::lock(&self.buckets[index], &self.buffers)
    }

    fn lock_all(&self) -> AllBuckets<'_> {
        AllBuckets::lock(&self.buckets, &self.evict_lock, &self.buffers)
    }
}
