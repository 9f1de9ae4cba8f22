//! Condition variables.
//!
//! A [`Condvar`] lets a fiber sleep until some predicate, guarded by a
//! [`Mutex`], becomes true. [`wait`] atomically releases the mutex and parks;
//! atomically here means what POSIX means: the fiber is on the cv's wait
//! queue before the mutex unlocks, so a wakeup that happens right after the
//! unlock cannot be missed.
//!
//! The mutex protects the predicate. A signaller that flips the predicate
//! while holding the mutex can never lose the race below; one that signals
//! without the mutex can:
//!
//! ```text
//! sleeper                          waker
//! ------------------------------------------------------
//! lock; see predicate false
//! decide to sleep
//!                                  set predicate true
//!                                  signal (queue empty: no-op)
//! enqueue on cv; unlock
//! (sleeps forever)
//! ```
//!
//! The library documents this requirement rather than enforcing it.
//!
//! [`wait`]: Condvar::wait

use crate::fiber::scheduler::scheduler;
use crate::fiber::{BlockReason, assert_can_block};
use crate::sync::mutex::{Mutex, RecurseMutex};
use crate::sync::spinlock::SpinLock;
use crate::sync::timeout::TimedSleep;
use crate::sync::waitq::WaitQueue;
use std::time::Instant;

struct CvState {
    waiters: WaitQueue,
}

fn waiters_of(state: &mut CvState) -> &mut WaitQueue {
    &mut state.waiters
}

/// A condition variable for fibers, paired with a [`Mutex`] for the duration
/// of each wait.
///
/// Construction is `const`, so a condvar can live in `static` storage.
pub struct Condvar {
    state: SpinLock<CvState>,
}

impl Condvar {
    /// Create a condition variable with no waiters.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(CvState {
                waiters: WaitQueue::new(),
            }),
        }
    }

    fn wait_inner(&self, mtx: &Mutex, deadline: Option<Instant>) -> bool {
        assert_can_block();
        let sched = scheduler();
        let state = self.state.lock();
        // SAFETY: `self` stays borrowed for the whole call; finish() below
        // runs before we return.
        let sleep = deadline.map(|d| unsafe { TimedSleep::arm(&self.state, waiters_of, d) });
        let mut state = Some(state);
        sched.park_with(&mut |fiber| {
            let mut state = state.take().expect("park callback ran twice");
            sched.fiber_has_blocked(&fiber, BlockReason::Mutex);
            sched.waitq_enqueue(&mut state.waiters, fiber);
            // While we hold the mutex we are not *sleeping* on it, so its
            // wait link is free for the cv queue; a fiber sleeps on one
            // queue at a time.
            //
            // Drop the cv spinlock before unlocking the mutex (which takes
            // the mutex's own spinlock): the two internal spinlocks are
            // never held together, so no ordering cycle can form between
            // them.
            drop(state);
            mtx.unlock();
        });
        let signalled = match sleep {
            Some(sleep) => !sleep.finish(),
            None => true,
        };
        // Timed or not, the caller gets the mutex back. The deadline applied
        // to the signal, not to this reacquisition.
        mtx.lock();
        signalled
    }

    /// Release `mtx`, park until signalled, reacquire `mtx`.
    ///
    /// The caller must hold `mtx`. Wake-ups are not spurious in this
    /// library, but callers should still re-check their predicate in a loop:
    /// another fiber may run between the wake and the mutex reacquisition.
    pub fn wait(&self, mtx: &Mutex) {
        self.wait_inner(mtx, None);
    }

    /// [`wait`], giving up on the signal at `deadline`.
    ///
    /// Returns `true` if signalled, `false` if the deadline passed first.
    /// Either way `mtx` is held again on return.
    ///
    /// [`wait`]: Condvar::wait
    pub fn timed_wait(&self, mtx: &Mutex, deadline: Instant) -> bool {
        self.wait_inner(mtx, Some(deadline))
    }

    /// [`wait`] with a [`RecurseMutex`] held at any depth.
    ///
    /// The lock is fully released for the wait and the caller's depth is
    /// restored after reacquisition.
    ///
    /// [`wait`]: Condvar::wait
    pub fn wait_recurse(&self, rmtx: &RecurseMutex) {
        self.timed_wait_recurse_inner(rmtx, None);
    }

    /// [`timed_wait`] with a [`RecurseMutex`] held at any depth.
    ///
    /// The saved depth is restored after reacquisition even when the wait
    /// timed out: the `false` return refers to the signal only, and
    /// ownership at the pre-wait depth is re-established regardless.
    ///
    /// [`timed_wait`]: Condvar::timed_wait
    pub fn timed_wait_recurse(&self, rmtx: &RecurseMutex, deadline: Instant) -> bool {
        self.timed_wait_recurse_inner(rmtx, Some(deadline))
    }

    fn timed_wait_recurse_inner(&self, rmtx: &RecurseMutex, deadline: Option<Instant>) -> bool {
        // wait_inner will unlock the inner mutex; bring the bookkeeping to
        // the unheld state first, since an unheld recursive mutex has no
        // holder and depth 0.
        let depth = rmtx.suspend_ownership();
        let signalled = self.wait_inner(rmtx.inner_mutex(), deadline);
        rmtx.resume_ownership(depth);
        signalled
    }

    /// Wake the longest-waiting fiber, if any.
    pub fn signal(&self) {
        let sched = scheduler();
        let mut state = self.state.lock();
        let waiter = sched.waitq_pop(&mut state.waiters);
        drop(state);
        if let Some(fiber) = waiter {
            sched.make_runnable(fiber);
        }
    }

    /// Wake every fiber enqueued at this moment.
    ///
    /// The queue is swapped into a local one under the cv spinlock and
    /// drained outside it, so the wakeups neither extend the lock hold time
    /// nor re-enter the cv lock. Fibers that enqueue after the swap wait for
    /// the next signal or broadcast. On an empty cv this is a no-op.
    pub fn broadcast(&self) {
        let sched = scheduler();
        let mut restartees = WaitQueue::new();
        let mut state = self.state.lock();
        if sched.waitq_is_empty(&state.waiters) {
            return;
        }
        sched.waitq_swap(&mut restartees, &mut state.waiters);
        drop(state);
        sched.wake_all(&mut restartees);
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
