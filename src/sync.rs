//! Mutex selection.
//!
//! Mirrors the driver layer's `parking_lot`/`std::sync` split: the
//! `parking_lot` feature (on by default) swaps in its non-poisoning,
//! smaller `Mutex` in place of the standard library's.

#[cfg(feature = "parking_lot")]
pub use parking_lot::Mutex;

#[cfg(not(feature = "parking_lot"))]
pub use std::sync::Mutex;

/// Locks `mutex`, unwrapping the `std::sync` poison `Result` when that
/// implementation is in use; `parking_lot::Mutex::lock` never returns one.
#[cfg(feature = "parking_lot")]
pub fn lock<T>(mutex: &Mutex<T>) -> parking_lot::MutexGuard<'_, T> {
    mutex.lock()
}

#[cfg(not(feature = "parking_lot"))]
pub fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}
