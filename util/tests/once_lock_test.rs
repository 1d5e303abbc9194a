//! Testing of [`OnceLock`].

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use util::cell::OnceLock;

#[test]
fn test_once_lock() {
    let lock = OnceLock::<u32>::default();
    assert!(lock.get().is_none());
    assert!(lock.set(5).is_ok());
    assert_eq!(*lock.get().expect("Should now have a value"), 5);
    assert_eq!(lock.set(6), Err(6), "Should no longer allow setting");

    let lock = OnceLock::from(7_u32);
    assert_eq!(*lock.get().expect("Should now have a value"), 7);
    assert!(lock.set(8).is_err(), "Should no longer allow setting");
}

#[test]
fn test_once_lock_single_winner() {
    let lock = Arc::new(OnceLock::<usize>::new());
    let winners = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..8)
        .map(|i| {
            let lock = Arc::clone(&lock);
            let winners = Arc::clone(&winners);
            std::thread::spawn(move || {
                if lock.set(i).is_ok() {
                    winners.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("Setter thread panicked");
    }
    assert_eq!(winners.load(Ordering::Relaxed), 1, "Exactly one set should win");
    assert!(lock.get().is_some_and(|value| *value < 8));
}

#[test]
fn test_once_lock_drops_value() {
    let value = Arc::new(());
    let lock = OnceLock::new();
    assert!(lock.set(Arc::clone(&value)).is_ok());
    assert_eq!(Arc::strong_count(&value), 2);
    drop(lock);
    assert_eq!(Arc::strong_count(&value), 1, "Dropping the lock should drop the value");
}
