//! Mutual exclusion for fibers.
//!
//! [`Mutex`] is a binary semaphore: a [`Semaphore`] whose count starts at 1.
//! Everything the semaphore guarantees (direct hand-off on unlock, FIFO
//! order among sleepers under the default wait queue) carries over.
//!
//! [`RecurseMutex`] layers owner and depth bookkeeping on top, so the holder
//! may re-lock without deadlocking. The bookkeeping needs no lock of its own:
//! `holder` and `depth` are written only by the fiber that holds the inner
//! mutex, and the only cross-fiber read is the `holder == me` check, which
//! for everyone but the holder merely fails the fast path.

use crate::fiber::assert_can_block;
use crate::fiber::scheduler::scheduler;
use crate::sync::semaphore::Semaphore;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// A parking mutual exclusion lock.
///
/// Unlike a spinlock, a contended `lock` parks the calling fiber until the
/// holder unlocks. Construction is `const`, so a mutex can live in `static`
/// storage.
///
/// There is no guard type and no owner tracking: like its POSIX counterpart,
/// the mutex trusts the caller to pair `lock` with `unlock`. Unlocking a
/// mutex that is not locked hands out an extra unit and breaks mutual
/// exclusion downstream.
pub struct Mutex {
    sem: Semaphore,
}

impl Mutex {
    /// Create an unlocked mutex.
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
        }
    }

    /// Acquire the lock, parking until it is handed to us.
    pub fn lock(&self) {
        self.sem.down();
    }

    /// Acquire the lock, giving up at `deadline`. Returns whether the lock
    /// was acquired.
    pub fn timed_lock(&self, deadline: Instant) -> bool {
        self.sem.timed_down(deadline)
    }

    /// Acquire the lock if it is free. Never parks.
    pub fn try_lock(&self) -> bool {
        self.sem.try_down()
    }

    /// Release the lock, waking the next sleeper if there is one.
    pub fn unlock(&self) {
        self.sem.up();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutex the holder may lock again.
///
/// The lock is released for other fibers only when `unlock` has been called
/// as many times as `lock`. Construction is `const`.
pub struct RecurseMutex {
    mtx: Mutex,
    /// Tid of the holding fiber; 0 when unheld.
    holder: AtomicU64,
    /// Lock depth of the holder; 0 when unheld.
    depth: AtomicUsize,
}

impl RecurseMutex {
    /// Create an unlocked recursive mutex.
    pub const fn new() -> Self {
        Self {
            mtx: Mutex::new(),
            holder: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    fn lock_inner(&self, deadline: Option<Instant>) -> bool {
        assert_can_block();
        // Only the holder can see its own tid here, and a fiber cannot race
        // itself, so the fast path needs no lock. A stale read by anyone
        // else just sends them to the inner mutex.
        let me = scheduler().current().tid();
        if self.holder.load(Ordering::Relaxed) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let locked = match deadline {
            Some(deadline) => self.mtx.timed_lock(deadline),
            None => {
                self.mtx.lock();
                true
            }
        };
        if locked {
            self.holder.store(me, Ordering::Relaxed);
            self.depth.store(1, Ordering::Relaxed);
        }
        locked
    }

    /// Acquire the lock, parking until available. Re-entrant for the holder.
    pub fn lock(&self) {
        self.lock_inner(None);
    }

    /// Acquire the lock, giving up at `deadline`. The recursive fast path
    /// never times out.
    pub fn timed_lock(&self, deadline: Instant) -> bool {
        self.lock_inner(Some(deadline))
    }

    /// Acquire the lock if free or already held by this fiber. Never parks.
    pub fn try_lock(&self) -> bool {
        assert_can_block();
        let me = scheduler().current().tid();
        if self.holder.load(Ordering::Relaxed) == me {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let locked = self.mtx.try_lock();
        if locked {
            self.holder.store(me, Ordering::Relaxed);
            self.depth.store(1, Ordering::Relaxed);
        }
        locked
    }

    /// Undo one `lock` by the holder; the final unlock releases the inner
    /// mutex.
    ///
    /// Panics when called by a fiber that does not hold the lock.
    pub fn unlock(&self) {
        let me = scheduler().current().tid();
        assert_eq!(
            self.holder.load(Ordering::Relaxed),
            me,
            "recursive mutex unlocked by a fiber that does not hold it"
        );
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.holder.store(0, Ordering::Relaxed);
            self.mtx.unlock();
        }
    }

    /// The mutex the bookkeeping wraps; the cv wait-recurse path parks on it.
    pub(crate) fn inner_mutex(&self) -> &Mutex {
        &self.mtx
    }

    /// Zero the ownership bookkeeping and hand back the saved depth, leaving
    /// the inner mutex for the caller to release.
    pub(crate) fn suspend_ownership(&self) -> usize {
        let depth = self.depth.load(Ordering::Relaxed);
        self.holder.store(0, Ordering::Relaxed);
        self.depth.store(0, Ordering::Relaxed);
        depth
    }

    /// Restore bookkeeping saved by [`suspend_ownership`], with the inner
    /// mutex held again by the calling fiber.
    ///
    /// [`suspend_ownership`]: RecurseMutex::suspend_ownership
    pub(crate) fn resume_ownership(&self, depth: usize) {
        self.holder
            .store(scheduler().current().tid(), Ordering::Relaxed);
        self.depth.store(depth, Ordering::Relaxed);
    }
}

impl Default for RecurseMutex {
    fn default() -> Self {
        Self::new()
    }
}
