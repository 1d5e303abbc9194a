//! Hooks into the process scheduler.
//!
//! The scheduler itself lives outside this crate. Code here only needs a way to give up the CPU
//! while waiting for a [`KSleepLock`](crate::sync::KSleepLock), which the boot sequence provides
//! with [`set_scheduler`].

use util::cell::OnceLock;

/// The function that switches away from the current thread of control.
static SCHED_YIELD: OnceLock<fn()> = OnceLock::new();

/// Register the function waiters call to let another thread of control run.
///
/// Only the first registration takes effect; later ones are ignored.
pub fn set_scheduler(yield_now: fn()) {
    if SCHED_YIELD.set(yield_now).is_err() {
        log::debug!("Scheduler already registered, keeping the first one");
    }
}

/// Let another thread of control run before returning.
///
/// Before a scheduler is registered there is nothing to switch to, so this only hints to the CPU
/// that we're in a wait loop. Callers that loop on this busy-wait until then.
pub fn sched_yield() {
    match SCHED_YIELD.get() {
        Some(yield_now) => yield_now(),
        None => core::hint::spin_loop(),
    }
}
