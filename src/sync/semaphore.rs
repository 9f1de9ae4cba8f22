//! Counting semaphore.
//!
//! A semaphore maintains a count of available units. [`down`] takes a unit,
//! parking the calling fiber when none are available; [`up`] returns a unit,
//! waking the longest-waiting fiber if there is one. A semaphore initialized
//! to 1 is a mutex ([`crate::sync::Mutex`] is exactly that), and one
//! initialized to 0 is a wakeup event: workers `down`, a coordinator `up`s
//! once per worker.
//!
//! Units are handed off directly: when `up` finds a waiter, the count stays
//! at 0 and the unit goes to that fiber, so a late [`try_down`] can never
//! steal a unit out from under a sleeper. With the default FIFO wait queue
//! this makes waiters strictly first-come-first-served.
//!
//! [`down`]: Semaphore::down
//! [`up`]: Semaphore::up
//! [`try_down`]: Semaphore::try_down

use crate::fiber::scheduler::scheduler;
use crate::fiber::{BlockReason, assert_can_block};
use crate::sync::spinlock::SpinLock;
use crate::sync::timeout::TimedSleep;
use crate::sync::waitq::WaitQueue;
use std::time::Instant;

struct SemState {
    count: usize,
    waiters: WaitQueue,
}

fn waiters_of(state: &mut SemState) -> &mut WaitQueue {
    &mut state.waiters
}

/// A counting semaphore for fibers.
///
/// Construction is `const`, so a semaphore can live in `static` storage and
/// is valid from the first use:
///
/// ```
/// use fibersync::sync::Semaphore;
///
/// static SLOTS: Semaphore = Semaphore::new(4);
/// ```
pub struct Semaphore {
    state: SpinLock<SemState>,
}

impl Semaphore {
    /// Create a semaphore holding `count` units.
    pub const fn new(count: usize) -> Self {
        Self {
            state: SpinLock::new(SemState {
                count,
                waiters: WaitQueue::new(),
            }),
        }
    }

    fn down_inner(&self, deadline: Option<Instant>) -> bool {
        assert_can_block();
        let sched = scheduler();
        let mut state = self.state.lock();
        if state.count > 0 {
            // Take the unit under the lock. A drained semaphore sits at 0
            // rather than going negative, which is what lets the timeout
            // helper treat semaphores and condition variables alike.
            state.count -= 1;
            return true;
        }
        // SAFETY: `self` stays borrowed for the whole call; finish() below
        // runs before we return.
        let sleep = deadline.map(|d| unsafe { TimedSleep::arm(&self.state, waiters_of, d) });
        let mut state = Some(state);
        sched.park_with(&mut |fiber| {
            let mut state = state.take().expect("park callback ran twice");
            // The scheduler must learn of the block before the spinlock
            // drops: the moment it does, an `up` may pop and wake us.
            sched.fiber_has_blocked(&fiber, BlockReason::Mutex);
            sched.waitq_enqueue(&mut state.waiters, fiber);
            drop(state);
        });
        match sleep {
            Some(sleep) => !sleep.finish(),
            None => true,
        }
    }

    /// Take a unit, parking until one is handed to us.
    pub fn down(&self) {
        self.down_inner(None);
    }

    /// Take a unit, giving up at `deadline`.
    ///
    /// Returns whether a unit was taken; `false` means the deadline passed
    /// first.
    pub fn timed_down(&self, deadline: Instant) -> bool {
        self.down_inner(Some(deadline))
    }

    /// Take a unit if one is immediately available. Never parks.
    pub fn try_down(&self) -> bool {
        assert_can_block();
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Return a unit, waking the next waiter if there is one.
    pub fn up(&self) {
        let sched = scheduler();
        let mut state = self.state.lock();
        let waiter = sched.waitq_pop(&mut state.waiters);
        if waiter.is_none() {
            state.count += 1;
        }
        // Hand-off: with a waiter the count stays 0, the unit is theirs.
        drop(state);
        if let Some(fiber) = waiter {
            sched.make_runnable(fiber);
        }
    }
}
