//! Device reference count with a wait-for-zero teardown barrier.
//!
//! Every operation that touches the device holds a [`RemoveGuard`]. Once
//! removal begins no new guard is granted, and teardown blocks until the
//! outstanding ones are dropped.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(feature = "std")]
use std::sync::{Condvar, Mutex};

pub struct RemoveLock {
    count: AtomicUsize,
    removing: AtomicBool,
    #[cfg(feature = "std")]
    gate: Mutex<()>,
    #[cfg(feature = "std")]
    zero: Condvar,
}

/// Held reference; released on drop.
#[must_use = "the reference is released as soon as the guard is dropped"]
pub struct RemoveGuard<'a> {
    lock: &'a RemoveLock,
}

impl RemoveLock {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            removing: AtomicBool::new(false),
            #[cfg(feature = "std")]
            gate: Mutex::new(()),
            #[cfg(feature = "std")]
            zero: Condvar::new(),
        }
    }

    /// Take a reference unless removal has started.
    pub fn acquire(&self) -> Option<RemoveGuard<'_>> {
        // Increment first so a concurrent waiter cannot miss us.
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.removing.load(Ordering::SeqCst) {
            self.release();
            return None;
        }
        Some(RemoveGuard { lock: self })
    }

    /// Refuse further references. Returns false if removal had already begun.
    pub fn begin_removal(&self) -> bool {
        !self.removing.swap(true, Ordering::SeqCst)
    }

    pub fn is_removing(&self) -> bool {
        self.removing.load(Ordering::SeqCst)
    }

    /// Current number of outstanding references (`RefCount`).
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Block until every reference is released.
    #[cfg(feature = "std")]
    pub fn wait_for_zero(&self) {
        let mut gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        while self.count.load(Ordering::SeqCst) != 0 {
            gate = self.zero.wait(gate).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Without a scheduler to sleep on, spin until every reference is released.
    #[cfg(not(feature = "std"))]
    pub fn wait_for_zero(&self) {
        while self.count.load(Ordering::SeqCst) != 0 {
            core::hint::spin_loop();
        }
    }

    fn release(&self) {
        let prev = self.count.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "BUG: remove lock released more often than acquired");
        #[cfg(feature = "std")]
        if prev == 1 {
            let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
            self.zero.notify_all();
        }
    }
}

impl Default for RemoveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RemoveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
