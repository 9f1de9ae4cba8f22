//! Reader-writer sleeping lock.
//!
//! Any number of readers or a single writer hold the lock at a time. Blocked
//! fibers sleep on one of two wait queues, and the unlocking fiber does all
//! the delicate work: a releasing writer prefers to hand the lock to the
//! next queued writer, and only when no writer waits does it drain every
//! queued reader at once; the last releasing reader hands the lock to a
//! queued writer.
//!
//! The policy is writer-preferring by design: it trades possible reader
//! starvation under a steady writer load for immunity to writer starvation
//! under a steady reader load. Two invariants hold throughout: a writer
//! never coexists with readers, and fibers wait on the reader queue only
//! while a writer holds the lock.

use crate::fiber::scheduler::scheduler;
use crate::fiber::{BlockReason, Fiber, assert_can_block};
use crate::sync::spinlock::SpinLock;
use crate::sync::timeout::TimedSleep;
use crate::sync::waitq::WaitQueue;
use std::sync::Arc;
use std::time::Instant;

struct RwState {
    nr_readers: usize,
    has_writer: bool,
    readers: WaitQueue,
    writers: WaitQueue,
}

fn readers_of(state: &mut RwState) -> &mut WaitQueue {
    &mut state.readers
}

fn writers_of(state: &mut RwState) -> &mut WaitQueue {
    &mut state.writers
}

/// A reader-writer lock for fibers.
///
/// Like the other primitives there is no guard type: the fiber that acquired
/// in either mode calls [`unlock`], which tells readers from writers by the
/// lock's own state. Construction is `const`, so an `RwLock` can live in
/// `static` storage.
///
/// [`unlock`]: RwLock::unlock
pub struct RwLock {
    state: SpinLock<RwState>,
}

impl RwLock {
    /// Create an unheld lock.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(RwState {
                nr_readers: 0,
                has_writer: false,
                readers: WaitQueue::new(),
                writers: WaitQueue::new(),
            }),
        }
    }

    fn rdlock_inner(&self, deadline: Option<Instant>) -> bool {
        assert_can_block();
        let sched = scheduler();
        let mut state = self.state.lock();
        // Readers always make progress when no writer holds the lock.
        if !state.has_writer {
            state.nr_readers += 1;
            return true;
        }
        // SAFETY: `self` stays borrowed for the whole call; finish() below
        // runs before we return.
        let sleep = deadline.map(|d| unsafe { TimedSleep::arm(&self.state, readers_of, d) });
        let mut state = Some(state);
        sched.park_with(&mut |fiber| {
            let mut state = state.take().expect("park callback ran twice");
            sched.fiber_has_blocked(&fiber, BlockReason::Mutex);
            sched.waitq_enqueue(&mut state.readers, fiber);
            drop(state);
        });
        match sleep {
            Some(sleep) => !sleep.finish(),
            None => true,
        }
    }

    /// Acquire in read mode, parking while a writer holds the lock.
    pub fn rdlock(&self) {
        self.rdlock_inner(None);
    }

    /// Acquire in read mode, giving up at `deadline`. Returns whether the
    /// lock was acquired.
    pub fn timed_rdlock(&self, deadline: Instant) -> bool {
        self.rdlock_inner(Some(deadline))
    }

    /// Acquire in read mode if no writer holds the lock. Never parks.
    pub fn try_rdlock(&self) -> bool {
        assert_can_block();
        let mut state = self.state.lock();
        if !state.has_writer {
            state.nr_readers += 1;
            true
        } else {
            false
        }
    }

    fn wrlock_inner(&self, deadline: Option<Instant>) -> bool {
        assert_can_block();
        let sched = scheduler();
        let mut state = self.state.lock();
        // A writer needs total exclusion: no writer and no readers.
        if !state.has_writer && state.nr_readers == 0 {
            state.has_writer = true;
            return true;
        }
        // SAFETY: as in rdlock_inner.
        let sleep = deadline.map(|d| unsafe { TimedSleep::arm(&self.state, writers_of, d) });
        let mut state = Some(state);
        sched.park_with(&mut |fiber| {
            let mut state = state.take().expect("park callback ran twice");
            sched.fiber_has_blocked(&fiber, BlockReason::Mutex);
            sched.waitq_enqueue(&mut state.writers, fiber);
            drop(state);
        });
        match sleep {
            Some(sleep) => !sleep.finish(),
            None => true,
        }
    }

    /// Acquire in write mode, parking while anyone holds the lock.
    pub fn wrlock(&self) {
        self.wrlock_inner(None);
    }

    /// Acquire in write mode, giving up at `deadline`. Returns whether the
    /// lock was acquired.
    pub fn timed_wrlock(&self, deadline: Instant) -> bool {
        self.wrlock_inner(Some(deadline))
    }

    /// Acquire in write mode if the lock is unheld. Never parks.
    pub fn try_wrlock(&self) -> bool {
        assert_can_block();
        let mut state = self.state.lock();
        if !state.has_writer && state.nr_readers == 0 {
            state.has_writer = true;
            true
        } else {
            false
        }
    }

    fn unlock_writer(state: &mut RwState, restartees: &mut Vec<Arc<Fiber>>) {
        let sched = scheduler();
        if let Some(writer) = sched.waitq_pop(&mut state.writers) {
            // Hand-off: has_writer stays set for the woken writer.
            restartees.push(writer);
        } else {
            state.has_writer = false;
            while let Some(reader) = sched.waitq_pop(&mut state.readers) {
                state.nr_readers += 1;
                restartees.push(reader);
            }
        }
    }

    fn unlock_reader(state: &mut RwState, restartees: &mut Vec<Arc<Fiber>>) {
        assert!(state.nr_readers > 0, "unlock of an unheld rwlock");
        state.nr_readers -= 1;
        if state.nr_readers == 0
            && let Some(writer) = scheduler().waitq_pop(&mut state.writers)
        {
            state.has_writer = true;
            restartees.push(writer);
        }
    }

    /// Release the lock in whichever mode the caller holds it.
    ///
    /// The mode is read off the lock itself: a set writer flag means a
    /// writer is unlocking. Waking happens after the internal spinlock is
    /// dropped.
    pub fn unlock(&self) {
        let sched = scheduler();
        let mut restartees = Vec::new();
        let mut state = self.state.lock();
        if state.has_writer {
            Self::unlock_writer(&mut state, &mut restartees);
        } else {
            Self::unlock_reader(&mut state, &mut restartees);
        }
        drop(state);
        for fiber in restartees {
            sched.make_runnable(fiber);
        }
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}
