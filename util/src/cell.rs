//! Cell types.

use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

/// A wrapper for [`UnsafeCell`] which is also [`Sync`].
///
/// This value is designed for state whose synchronization is provided by something outside the
/// cell, such as a lock that guards a whole group of cells.
#[repr(transparent)]
pub struct SyncUnsafeCell<T: ?Sized> {
    /// The inner cell.
    inner: UnsafeCell<T>,
}

impl<T> SyncUnsafeCell<T> {
    /// Construct a new [`SyncUnsafeCell`].
    pub const fn new(value: T) -> Self {
        Self {
            inner: UnsafeCell::new(value),
        }
    }

    /// Convert back into the original value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> SyncUnsafeCell<T> {
    /// Get a pointer to the inner value.
    ///
    /// This method is always safe to call, and the resulting pointer is safe to dereference so
    /// long as you comply with normal aliasing rules.
    pub const fn get(&self) -> *mut T {
        self.inner.get()
    }

    /// Get an exclusive reference to the inner value (safely).
    ///
    /// Having an exclusive reference to `self` ensures that no one else can access the inner
    /// value, so this is always a safe operation.
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

// SAFETY:
// Every user of the cell takes on the job of synchronizing access, which is what makes sharing it
// sound. Values which can't be sent can't be shared this way.
unsafe impl<T: ?Sized + Send> Sync for SyncUnsafeCell<T> {}

/// Nothing has been written and no writer has started.
const ONCE_EMPTY: u8 = 0;
/// A writer has claimed the slot but hasn't finished writing.
const ONCE_WRITING: u8 = 1;
/// The value is written and will never change again.
const ONCE_READY: u8 = 2;

/// A locked value which can only be written to once.
///
/// Unlike `std::sync::OnceLock`, readers never wait for a writer in progress: until the value is
/// fully written, [`Self::get`] reports that there is no value.
pub struct OnceLock<T> {
    /// One of [`ONCE_EMPTY`], [`ONCE_WRITING`], or [`ONCE_READY`].
    state: AtomicU8,
    /// The inner value.
    value: UnsafeCell<MaybeUninit<T>>,
}
impl<T> OnceLock<T> {
    /// Construct a new lock, without a written value.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ONCE_EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Get the value, if it has already been initialized.
    pub fn get(&self) -> Option<&T> {
        (self.state.load(Ordering::Acquire) == ONCE_READY).then(|| {
            // SAFETY:
            // The state only becomes `ONCE_READY` after the value is written, and after that no
            // exclusive access can exist anymore.
            unsafe { (*self.value.get()).assume_init_ref() }
        })
    }

    /// Attempt to set the value.
    ///
    /// If the value has already been set (or another thread is setting it right now), then the
    /// given value is returned in an `Err`.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(ONCE_EMPTY, ONCE_WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // SAFETY:
        // Moving the state out of `ONCE_EMPTY` gives us exclusive access until we publish
        // `ONCE_READY`.
        unsafe { &mut *self.value.get() }.write(value);
        self.state.store(ONCE_READY, Ordering::Release);
        Ok(())
    }
}
impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}
/// Construct a [`OnceLock`] with the value already inside.
impl<T> From<T> for OnceLock<T> {
    fn from(value: T) -> Self {
        Self {
            state: AtomicU8::new(ONCE_READY),
            value: UnsafeCell::new(MaybeUninit::new(value)),
        }
    }
}
impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == ONCE_READY {
            // SAFETY: The value was written, and we have exclusive access to drop it.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}
// SAFETY:
// A `OnceLock<T>` is equivalent to a `T`.
unsafe impl<T: Send> Send for OnceLock<T> {}
// SAFETY:
// Sharing a `OnceLock<T>` shares the `T`, and `set` can move a `T` in from another thread.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}
