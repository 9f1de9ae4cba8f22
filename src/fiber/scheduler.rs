//! The second-level scheduler interface.
//!
//! The [`Scheduler`] trait is how the synchronization primitives talk to
//! whatever is actually multiplexing fibers onto virtual cores. It defines
//! the four operations every 2LS must provide ([`current`],
//! [`fiber_has_blocked`], [`make_runnable`], and [`park_with`]) and a set of
//! wait-queue hooks with default implementations. A 2LS that wants priority
//! queues, per-core queues, or any other wake order overrides the hooks; one
//! that is happy with FIFO overrides nothing.
//!
//! A scheduler is installed at most once, before any fiber activity, with
//! [`set_scheduler`]. When none is installed, the built-in [`HostScheduler`]
//! is used: every fiber owns an OS thread, parking stands in for yielding,
//! and the OS kernel plays the role of the virtual-core layer.
//!
//! [`current`]: Scheduler::current
//! [`fiber_has_blocked`]: Scheduler::fiber_has_blocked
//! [`make_runnable`]: Scheduler::make_runnable
//! [`park_with`]: Scheduler::park_with

use super::{BlockReason, Fiber, FiberState};
use crate::sync::waitq::WaitQueue;
use core::cell::RefCell;
use log::trace;
use std::sync::Arc;

/// A trait for a second-level scheduler.
///
/// The blocking primitives in [`crate::sync`] are scheduler-independent:
/// everything they need from the runtime goes through this trait. The
/// contract that makes "register and sleep" atomic is carried by
/// [`park_with`]: the callback it is handed runs exactly once, in scheduler
/// context, after the calling fiber is quiescent, so the callback may link
/// the fiber onto a wait queue and release the primitive's spinlock without
/// any window in which a waker could see a half-suspended fiber.
///
/// [`park_with`]: Scheduler::park_with
pub trait Scheduler: Sync {
    /// The fiber running on the current virtual core.
    fn current(&self) -> Arc<Fiber>;

    /// Note that `fiber` is about to block for `reason`.
    ///
    /// The primitives call this from the park callback *before* the fiber is
    /// enqueued and the spinlock released: as soon as the lock drops, a
    /// concurrent waker may pass the fiber to [`make_runnable`], and the
    /// scheduler must already know it blocked.
    ///
    /// [`make_runnable`]: Scheduler::make_runnable
    fn fiber_has_blocked(&self, fiber: &Arc<Fiber>, reason: BlockReason);

    /// Make a blocked fiber runnable again.
    ///
    /// Never called while the caller holds the spinlock that guarded the
    /// fiber's wait queue.
    fn make_runnable(&self, fiber: Arc<Fiber>);

    /// Suspend the current fiber, running `register` once from scheduler
    /// context after the fiber is fully suspended.
    ///
    /// Returns when another context has passed the fiber to
    /// [`make_runnable`]. The callback receives the handle of the parked
    /// fiber; borrows captured by the callback stay valid because the fiber's
    /// stack, while frozen, is alive for the whole park.
    ///
    /// [`make_runnable`]: Scheduler::make_runnable
    fn park_with(&self, register: &mut dyn FnMut(Arc<Fiber>));

    /// Enqueue `fiber` on `queue`. Default: FIFO tail.
    fn waitq_enqueue(&self, queue: &mut WaitQueue, fiber: Arc<Fiber>) {
        queue.push_back(fiber);
    }

    /// Remove and return the next fiber to wake. Default: FIFO head.
    fn waitq_pop(&self, queue: &mut WaitQueue) -> Option<Arc<Fiber>> {
        queue.pop_front()
    }

    /// Remove a specific fiber from `queue`, returning whether it was there.
    ///
    /// This is how a timeout and a regular wake race for a sleeper: whichever
    /// side removes the fiber first owns the wakeup.
    fn waitq_remove(&self, queue: &mut WaitQueue, fiber: &Arc<Fiber>) -> bool {
        queue.remove(fiber)
    }

    /// Exchange the contents of two queues in O(1).
    fn waitq_swap(&self, a: &mut WaitQueue, b: &mut WaitQueue) {
        WaitQueue::swap(a, b);
    }

    /// Whether `queue` holds no fibers.
    fn waitq_is_empty(&self, queue: &WaitQueue) -> bool {
        queue.is_empty()
    }

    /// Wake every fiber on `queue`.
    ///
    /// Callers never hold a spinlock here; broadcast-style paths swap the
    /// primitive's queue into a local one first. A 2LS with a bulk-wakeup
    /// path (e.g. one runqueue insertion for the whole batch) overrides this.
    fn wake_all(&self, queue: &mut WaitQueue) {
        while let Some(fiber) = self.waitq_pop(queue) {
            self.make_runnable(fiber);
        }
    }
}

static SCHEDULER: spin::Once<&'static dyn Scheduler> = spin::Once::new();
static HOST: HostScheduler = HostScheduler;

/// Install the process-wide scheduler.
///
/// Must be called at most once, before any fiber blocks. Panics if a
/// scheduler is already installed.
pub fn set_scheduler(sched: impl Scheduler + 'static) {
    let mut installed = false;
    SCHEDULER.call_once(|| {
        installed = true;
        let sched: &'static dyn Scheduler = Box::leak(Box::new(sched));
        sched
    });
    assert!(installed, "a scheduler is already installed");
    trace!("scheduler installed");
}

/// The installed scheduler, or the built-in [`HostScheduler`].
pub fn scheduler() -> &'static dyn Scheduler {
    SCHEDULER.get().copied().unwrap_or(&HOST)
}

std::thread_local! {
    static CURRENT: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

pub(crate) fn install_current(fiber: Arc<Fiber>) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(fiber));
}

fn host_current() -> Arc<Fiber> {
    CURRENT.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(Fiber::adopt)
            .clone()
    })
}

/// The built-in 2LS: one OS thread per fiber.
///
/// Parking the thread stands in for yielding the virtual core, so the
/// park/unpark token gives exactly the wakeup guarantee the [`Scheduler`]
/// contract asks for: a [`make_runnable`] that lands between the register
/// callback and the actual park is not lost.
///
/// [`make_runnable`]: Scheduler::make_runnable
pub struct HostScheduler;

impl Scheduler for HostScheduler {
    fn current(&self) -> Arc<Fiber> {
        host_current()
    }

    fn fiber_has_blocked(&self, fiber: &Arc<Fiber>, reason: BlockReason) {
        *fiber.state.lock() = FiberState::Blocked(reason);
        trace!("fiber {} ({}) blocked: {:?}", fiber.tid(), fiber.name(), reason);
    }

    fn make_runnable(&self, fiber: Arc<Fiber>) {
        {
            let mut state = fiber.state.lock();
            debug_assert!(
                matches!(*state, FiberState::Blocked(_)),
                "make_runnable on a fiber that is not blocked"
            );
            *state = FiberState::Runnable;
        }
        trace!("fiber {} ({}) made runnable", fiber.tid(), fiber.name());
        fiber
            .exec_handle()
            .expect("runnable fiber has no virtual core")
            .unpark();
    }

    fn park_with(&self, register: &mut dyn FnMut(Arc<Fiber>)) {
        let fiber = host_current();
        register(fiber.clone());
        // Token semantics of unpark make the check-then-park loop lossless,
        // and the loop absorbs spurious wakeups.
        loop {
            if fiber.state() == FiberState::Runnable {
                break;
            }
            std::thread::park();
        }
        *fiber.state.lock() = FiberState::Running;
    }
}
