//! Synchronization
//!
//! Two lock kinds, matched to how long they are held:
//!
//! - [`KSpinLock`] guards short metadata sections (bucket chains, the free list, reference
//!   counts). Nothing that can block happens while one is held, so waiters just spin.
//! - [`KSleepLock`] guards a buffer's payload and may be held across device I/O, so waiters give
//!   their CPU back to the scheduler instead of burning it.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// A lock which "spins" when contended.
pub struct KSpinLock<T: ?Sized> {
    /// The lock state.
    ///
    /// `false` means the lock is not held, and `true` means the lock is held.
    flag: AtomicBool,
    /// The value stored in the lock.
    value: UnsafeCell<T>,
}
impl<T> KSpinLock<T> {
    /// Construct a [`KSpinLock`] to wrap the given value.
    pub const fn new(value: T) -> Self {
        Self {
            flag: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized> KSpinLock<T> {
    /// Lock the mutex, returning an RAII guard.
    ///
    /// If the mutex is already locked, then this method busy-waits until the holder releases it.
    pub fn lock(&self) -> KSpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.flag.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Attempt to lock the mutex without blocking.
    pub fn try_lock(&self) -> Option<KSpinLockGuard<'_, T>> {
        self.flag
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| KSpinLockGuard {
                // SAFETY:
                // We've locked `flag`, so we have exclusive access.
                data: unsafe { &mut *self.value.get() },
                flag: &self.flag,
            })
    }
}

// UnsafeCell implements `Send` as appropriate, so we only need `Sync`.

// SAFETY:
// Sharing the mutex between threads corresponds to sending the value to whichever thread locks
// the mutex.
unsafe impl<T: ?Sized + Send> Sync for KSpinLock<T> {}

/// An RAII guard for a [`KSpinLock`].
///
/// This value is constructed by calling [`KSpinLock::lock`] and related methods.
pub struct KSpinLockGuard<'a, T: ?Sized> {
    data: &'a mut T,
    flag: &'a AtomicBool,
}
impl<T: ?Sized> Deref for KSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.data
    }
}
impl<T: ?Sized> DerefMut for KSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}
impl<T: ?Sized> Drop for KSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A lock whose waiters yield to the scheduler while it is held.
///
/// Holding one for a long time (across a disk transfer, say) only delays the threads that want
/// this particular lock.
///
/// Waiting goes through [`crate::proc::sched_yield`]. Until boot registers a scheduler with
/// [`crate::proc::set_scheduler`] there is nothing to yield to, and waiters busy-wait like a
/// [`KSpinLock`]. Contention only starts once other harts or processes run, which is after
/// registration.
pub struct KSleepLock<T: ?Sized> {
    /// Whether some guard currently exists.
    locked: AtomicBool,
    /// The value stored in the lock.
    value: UnsafeCell<T>,
}
impl<T> KSleepLock<T> {
    /// Construct a [`KSleepLock`] to wrap the given value.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized> KSleepLock<T> {
    /// Lock, giving up the CPU through [`crate::proc::sched_yield`] until the lock is free.
    pub fn lock(&self) -> KSleepLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            crate::proc::sched_yield();
        }
    }

    /// Attempt to lock without waiting.
    pub fn try_lock(&self) -> Option<KSleepLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| KSleepLockGuard {
                // SAFETY:
                // We've set `locked`, so we have exclusive access.
                data: unsafe { &mut *self.value.get() },
                locked: &self.locked,
            })
    }
}

// SAFETY:
// Same reasoning as for `KSpinLock`: locking hands the value to one thread at a time.
unsafe impl<T: ?Sized + Send> Sync for KSleepLock<T> {}

/// An RAII guard for a [`KSleepLock`].
pub struct KSleepLockGuard<'a, T: ?Sized> {
    data: &'a mut T,
    locked: &'a AtomicBool,
}
impl<T: ?Sized> Deref for KSleepLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.data
    }
}
impl<T: ?Sized> DerefMut for KSleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}
impl<T: ?Sized> Drop for KSleepLockGuard<'_, T> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::{KSleepLock, KSpinLock};

    #[test]
    fn test_spin_lock_exclusive() {
        let lock = KSpinLock::new(0_u32);
        {
            let guard = lock.try_lock();
            assert!(guard.is_some(), "Unlocked lock must be lockable");
            assert!(lock.try_lock().is_none(), "Lock acquired twice");
        }
        assert!(lock.try_lock().is_some(), "Guard should have unlocked on drop");
    }

    #[test]
    fn test_spin_lock_counts_across_threads() {
        let lock = Arc::new(KSpinLock::new(0_u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("Counter thread panicked");
        }
        assert_eq!(*lock.lock(), 40_000);
    }

    #[test]
    fn test_sleep_lock_waiter_runs_after_holder() {
        crate::proc::test::use_counting_scheduler();
        let lock = Arc::new(KSleepLock::new(Vec::new()));
        let holder = lock.lock();
        assert!(lock.try_lock().is_none());
        let started = Arc::new(AtomicBool::new(false));
        let waiter = {
            let lock = Arc::clone(&lock);
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                started.store(true, Ordering::Release);
                lock.lock().push("waiter");
            })
        };
        while !started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
        // The waiter gives up its CPU through the scheduler while we hold the lock.
        let yields = crate::proc::test::yields();
        while crate::proc::test::yields() == yields {
            std::thread::yield_now();
        }
        let mut holder = holder;
        holder.push("holder");
        drop(holder);
        waiter.join().expect("Waiter panicked");
        assert_eq!(*lock.lock(), ["holder", "waiter"]);
        assert!(lock.try_lock().is_some());
    }
}
