//! Timed-sleep plumbing shared by every `timed_*` variant.
//!
//! A timed sleeper arms a [`TimedSleep`] before parking and finishes it after
//! resuming. The armed alarm's handler and the primitive's normal wake path
//! race through the wait queue under the primitive's spinlock: whichever side
//! unlinks the fiber first owns the wakeup, so exactly one of
//! {wake, timeout} resolves the sleep and the loser sees the fiber already
//! gone.

use crate::alarm::{AlarmId, alarm_driver};
use crate::fiber::Fiber;
use crate::fiber::scheduler::scheduler;
use crate::sync::spinlock::SpinLock;
use crate::sync::waitq::WaitQueue;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared between the sleeping fiber and the alarm handler.
struct SleepBlob<T> {
    timed_out: AtomicBool,
    fiber: Arc<Fiber>,
    /// The primitive's state lock. Raw because the primitive is borrowed, not
    /// owned; see the safety contract on [`TimedSleep::arm`].
    target: *const SpinLock<T>,
    /// Projects the wait queue the fiber sleeps on out of the locked state.
    queue_of: fn(&mut T) -> &mut WaitQueue,
}

unsafe impl<T: Send> Send for SleepBlob<T> {}
unsafe impl<T: Send> Sync for SleepBlob<T> {}

impl<T: Send> SleepBlob<T> {
    /// The alarm handler: extract the fiber if it is still asleep.
    fn fire(&self) {
        // SAFETY: the waiter keeps the primitive borrowed until finish()
        // returns, and finish() cancels the alarm synchronously with this
        // handler, so the target outlives every dereference here.
        let target = unsafe { &*self.target };
        let sched = scheduler();
        let mut state = target.lock();
        let expired = sched.waitq_remove((self.queue_of)(&mut state), &self.fiber);
        if expired {
            self.timed_out.store(true, Ordering::Release);
        }
        drop(state);
        if expired {
            sched.make_runnable(self.fiber.clone());
        }
    }
}

/// An armed deadline bound to one parked fiber on one wait queue.
pub(crate) struct TimedSleep<T> {
    blob: Arc<SleepBlob<T>>,
    alarm: AlarmId,
}

impl<T: Send + 'static> TimedSleep<T> {
    /// Arm an alarm that will pull the current fiber off `queue_of(target)`
    /// at `deadline`.
    ///
    /// Called with the target's spinlock held, before parking; the handler
    /// simply spins on that lock until the park callback releases it.
    ///
    /// # Safety
    ///
    /// The caller must keep `target` alive and borrowed until
    /// [`TimedSleep::finish`] returns.
    pub(crate) unsafe fn arm(
        target: &SpinLock<T>,
        queue_of: fn(&mut T) -> &mut WaitQueue,
        deadline: Instant,
    ) -> Self {
        let blob = Arc::new(SleepBlob {
            timed_out: AtomicBool::new(false),
            fiber: scheduler().current(),
            target: target as *const _,
            queue_of,
        });
        let handler = {
            let blob = blob.clone();
            Box::new(move || blob.fire())
        };
        let alarm = alarm_driver().arm_at(deadline, handler);
        Self { blob, alarm }
    }

    /// Cancel the alarm and report whether the sleep timed out.
    ///
    /// Blocks until the handler is guaranteed quiescent, which makes the
    /// flag read race-free.
    pub(crate) fn finish(self) -> bool {
        alarm_driver().cancel(self.alarm);
        self.blob.timed_out.load(Ordering::Acquire)
    }
}
