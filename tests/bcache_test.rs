//! Testing of [`BufferCache`] against a [`RamDisk`].

use std::sync::atomic::{AtomicBool, Ordering};

use kcore::{BlockId, BufferCache, CacheConfig, RamDisk, param::BLOCK_SIZE};

const DEV: u32 = 1;

fn cache(disk: &RamDisk, buffers: usize, buckets: usize) -> BufferCache<&RamDisk> {
    kcore::proc::set_scheduler(std::thread::yield_now);
    BufferCache::new(disk, CacheConfig { buffers, buckets })
}

fn id(block: u32) -> BlockId {
    BlockId { device: DEV, block }
}

/// Find the buffer bound to `block`, checking that there's only one.
fn state_of(cache: &BufferCache<&RamDisk>, block: u32) -> Option<kcore::BufferState> {
    let mut bound = cache
        .snapshot()
        .into_iter()
        .filter(|state| state.binding == Some(id(block)));
    let state = bound.next();
    assert!(bound.next().is_none(), "Block {block} cached twice");
    state
}

#[test]
fn test_reuse_released_buffer() {
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 2, 1);
    let first = cache.acquire(DEV, 10);
    let second = cache.acquire(DEV, 20);
    let first_slot = state_of(&cache, 10).expect("Block 10 should be cached").slot;

    cache.release(first);
    let third = cache.acquire(DEV, 30);
    assert_eq!(third.id(), id(30));
    assert_eq!(
        state_of(&cache, 30).expect("Block 30 should be cached").slot,
        first_slot
    );
    assert!(state_of(&cache, 10).is_none());
    drop((second, third));
}

#[test]
fn test_read_through() {
    let disk = RamDisk::new(DEV, 64);
    disk.set_contents(5, &[7; BLOCK_SIZE])
        .expect("Block 5 should exist");
    let cache = cache(&disk, 4, 2);

    let guard = cache.acquire(DEV, 5);
    assert_eq!(disk.reads(), 0, "Acquire alone shouldn't touch the disk");
    cache.release(guard);

    let guard = cache.read(DEV, 5);
    assert_eq!(*guard, [7; BLOCK_SIZE]);
    assert_eq!(disk.reads(), 1);
    cache.release(guard);

    let guard = cache.read(DEV, 5);
    assert_eq!(*guard, [7; BLOCK_SIZE]);
    assert_eq!(disk.reads(), 1, "Cached block was read again");
    assert!(state_of(&cache, 5).expect("Block 5 should be cached").valid);
}

#[test]
fn test_write_through() {
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 4, 2);
    let mut guard = cache.read(DEV, 2);
    guard.fill(9);
    cache.commit(&mut guard);
    assert_eq!(disk.writes(), 1);
    assert_eq!(disk.contents(2), Some([9; BLOCK_SIZE]));
    cache.release(guard);
}

#[test]
fn test_evict_from_other_bucket() {
    let disk = RamDisk::new(DEV, 64);
    // One buffer starts in each bucket.
    let cache = cache(&disk, 2, 2);
    let zero = cache.acquire(DEV, 0);
    let two = cache.acquire(DEV, 2);
    assert!(cache.snapshot().iter().all(|state| state.bucket == 0));
    drop((zero, two));

    let one = cache.acquire(DEV, 1);
    assert_eq!(state_of(&cache, 1).expect("Block 1 should be cached").bucket, 1);
    drop(one);
}

#[test]
#[should_panic(expected = "no free buffers")]
fn test_exhaustion_is_fatal() {
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 2, 2);
    let _a = cache.acquire(DEV, 0);
    let _b = cache.acquire(DEV, 1);
    let _c = cache.acquire(DEV, 2);
}

#[test]
#[should_panic(expected = "at least one buffer")]
fn test_empty_pool_is_fatal() {
    let disk = RamDisk::new(DEV, 64);
    let _cache = cache(&disk, 0, 1);
}

#[test]
fn test_pinned_buffer_not_evicted() {
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 2, 1);
    let mut guard = cache.read(DEV, 3);
    guard[0] = 42;
    let pin = cache.pin(&guard);
    assert_eq!(pin.id(), id(3));
    cache.release(guard);
    assert_eq!(state_of(&cache, 3).expect("Block 3 should be cached").refcnt, 1);

    // Only the unpinned buffer is free, so each of these must reuse it.
    for block in 4..8 {
        let _ = cache.read(DEV, block);
        assert!(state_of(&cache, 3).is_some(), "Pinned buffer was evicted");
    }

    cache.unpin(pin);
    assert_eq!(state_of(&cache, 3).expect("Block 3 should be cached").refcnt, 0);
    let reads = disk.reads();
    let guard = cache.read(DEV, 3);
    assert_eq!(guard[0], 42, "Uncommitted change lost while pinned");
    assert_eq!(disk.reads(), reads);
}

#[test]
fn test_waiters_share_one_buffer() {
    const WAITERS: u32 = 4;
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 8, 3);
    let holder = cache.acquire(DEV, 7);

    std::thread::scope(|s| {
        for _ in 0..WAITERS {
            let cache = &cache;
            s.spawn(move || {
                let mut guard = cache.acquire(DEV, 7);
                let count = u32::from_ne_bytes(guard[..4].try_into().expect("Slice is 4 bytes"));
                guard[..4].copy_from_slice(&(count + 1).to_ne_bytes());
            });
        }
        // Every waiter holds a reference while blocked on the payload lock.
        while state_of(&cache, 7).expect("Block 7 should be cached").refcnt < WAITERS + 1 {
            std::thread::yield_now();
        }
        assert_eq!(
            state_of(&cache, 7).expect("Block 7 should be cached").refcnt,
            WAITERS + 1
        );
        cache.release(holder);
    });

    let state = state_of(&cache, 7).expect("Block 7 should be cached");
    assert_eq!(state.refcnt, 0);
    let guard = cache.acquire(DEV, 7);
    assert_eq!(guard[..4], WAITERS.to_ne_bytes());
}

#[test]
fn test_holders_serialized() {
    let disk = RamDisk::new(DEV, 64);
    let cache = cache(&disk, 4, 2);
    let inside = AtomicBool::new(false);
    std::thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                for _ in 0..100 {
                    let guard = cache.acquire(DEV, 11);
                    assert!(
                        !inside.swap(true, Ordering::AcqRel),
                        "Two holders of one block at once"
                    );
                    std::thread::yield_now();
                    inside.store(false, Ordering::Release);
                    cache.release(guard);
                }
            });
        }
    });
}

#[test]
fn test_concurrent_counters() {
    const THREADS: u32 = 4;
    const ROUNDS: u32 = 200;
    const BLOCKS: u32 = 6;
    let disk = RamDisk::new(DEV, 64);
    // Fewer buffers than blocks touched over time, so buffers get evicted and reread.
    let cache = cache(&disk, 5, 3);

    std::thread::scope(|s| {
        for thread in 0..THREADS {
            let cache = &cache;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let block = (thread + round) % BLOCKS;
                    let mut guard = cache.read(DEV, block);
                    let count =
                        u32::from_ne_bytes(guard[..4].try_into().expect("Slice is 4 bytes"));
                    guard[..4].copy_from_slice(&(count + 1).to_ne_bytes());
                    cache.commit(&mut guard);
                    cache.release(guard);
                }
            });
        }
    });

    let total: u32 = (0..BLOCKS)
        .map(|block| {
            let data = disk.contents(block).expect("Block should exist");
            u32::from_ne_bytes(data[..4].try_into().expect("Slice is 4 bytes"))
        })
        .sum();
    assert_eq!(total, THREADS * ROUNDS, "Lost an update");
    assert!(cache.snapshot().iter().all(|state| state.refcnt == 0));
}

#[test]
#[should_panic(expected = "not held from this cache")]
fn test_commit_foreign_guard() {
    let disk = RamDisk::new(DEV, 64);
    let mine = cache(&disk, 2, 1);
    let theirs = cache(&disk, 2, 1);
    let mut guard = theirs.acquire(DEV, 0);
    mine.commit(&mut guard);
}

#[test]
fn test_out_of_range_block_id() {
    let disk = RamDisk::new(DEV, 4);
    let mut block = [0; BLOCK_SIZE];
    assert!(
        kcore::BlockDevice::transfer(&disk, kcore::block::Direction::Read, id(9), &mut block)
            .is_err()
    );
}
