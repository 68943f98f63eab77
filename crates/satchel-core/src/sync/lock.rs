//! Reentrancy lock owned by one orchestrator instance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const FREE: u64 = 0;

/// Non-queueing lock: a second acquire while held fails immediately.
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    owner: Arc<AtomicU64>,
    next_ticket: Arc<AtomicU64>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` if a run already holds it.
    pub fn try_acquire(&self) -> Option<SyncLockGuard> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        self.owner
            .compare_exchange(FREE, ticket, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncLockGuard {
                owner: Arc::clone(&self.owner),
                ticket,
            })
    }

    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Acquire) != FREE
    }

    /// Release the lock regardless of who holds it. Returns whether it was held.
    ///
    /// A guard from the abandoned run will not release a lock re-acquired later.
    pub fn force_reset(&self) -> bool {
        self.owner.swap(FREE, Ordering::AcqRel) != FREE
    }
}

/// Releases the lock on drop, on every exit path.
#[derive(Debug)]
pub struct SyncLockGuard {
    owner: Arc<AtomicU64>,
    ticket: u64,
}

impl SyncLockGuard {
    /// Release explicitly; same as dropping.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        let _ = self
            .owner
            .compare_exchange(self.ticket, FREE, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let lock = SyncLock::new();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn force_reset_frees_abandoned_lock() {
        let lock = SyncLock::new();
        let stale = lock.try_acquire();
        assert!(lock.force_reset());
        assert!(!lock.force_reset());

        let fresh = lock.try_acquire();
        assert!(fresh.is_some());

        // The abandoned run finishing late must not free the new holder.
        drop(stale);
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());
        drop(fresh);
        assert!(!lock.is_held());
    }

    #[test]
    fn instances_do_not_share_state() {
        let first = SyncLock::new();
        let second = SyncLock::new();
        let _held = first.try_acquire();
        assert!(second.try_acquire().is_some());
    }
}
