//! # Spin Lock

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A tiny spinlock for short critical sections.
///
/// Suitable for a uniprocessor target and early boot, where critical
/// sections are short and preemption is either disabled or absent. The
/// memory-protection code uses it to make its boot-time statics (the page
/// pool) sound shared state.
///
/// # Caveats
/// - Does **not** disable interrupts.
/// - Busy-waits with `spin_loop`; keep critical sections small.
pub struct SpinLock<T> {
    /// Lock state (`false` = unlocked, `true` = locked).
    locked: AtomicBool,
    /// The protected value.
    inner: UnsafeCell<T>,
}

// Safety: the lock enforces exclusive access; sharing is fine whenever the
// inner value could be sent to the accessing context.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new spinlock wrapping `inner`.
    pub const fn new(inner: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Execute `f` with exclusive access to the inner value.
    ///
    /// Spins until the lock is acquired, then releases it after `f` returns.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        // Safety: we hold the lock, so access is exclusive.
        let res = {
            let inner = unsafe { &mut *self.inner.get() };
            f(inner)
        };
        self.locked.store(false, Ordering::Release);
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_access() {
        let lock = SpinLock::new(0u32);
        lock.with_lock(|v| *v += 1);
        lock.with_lock(|v| *v += 2);
        assert_eq!(lock.with_lock(|v| *v), 3);
    }
}
