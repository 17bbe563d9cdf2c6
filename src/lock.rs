//! A binary lock that refuses instead of queueing.
//!
//! [`NonBlockingMutex::try_acquire`] either hands out the single
//! [`LockGuard`] or returns `None` immediately. Callers that lose the race
//! are expected to skip their work, not wait for it.

use std::sync::atomic::{AtomicBool, Ordering};

/// A lock with a strict try-acquire/release pair.
#[derive(Debug, Default)]
pub struct NonBlockingMutex {
    locked: AtomicBool,
}

impl NonBlockingMutex {
    /// Creates an unlocked mutex.
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Attempts to take the lock without blocking.
    ///
    /// Returns `None` when another guard is outstanding. The returned guard
    /// releases the lock when dropped, so every exit path of the holder
    /// releases it exactly once.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LockGuard { owner: self })
    }

    /// Returns true while a guard is outstanding.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Proof of holding a [`NonBlockingMutex`].
#[derive(Debug)]
pub struct LockGuard<'a> {
    owner: &'a NonBlockingMutex,
}

impl LockGuard<'_> {
    /// Releases the lock explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.owner.locked.store(false, Ordering::Release);
    }
}
