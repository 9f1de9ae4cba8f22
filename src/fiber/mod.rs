//! Fiber abstraction, a cooperatively scheduled user thread.
//!
//! ## The threading model
//!
//! A program using this crate consists of a collection of *fibers*, each with
//! its own stack and local state, multiplexed onto a smaller set of *virtual
//! cores*. A fiber runs on a virtual core until it voluntarily yields, which
//! includes the implicit yield performed by every blocking operation in
//! [`crate::sync`]. There is no preemption of a critical section.
//!
//! Which fiber runs next is decided by the second-level scheduler (2LS); see
//! [`scheduler`]. This module owns what is scheduler-independent: the
//! [`Fiber`] handle and its state machine, join handles, and the host spawn
//! API that backs each fiber with an OS thread acting as its virtual core.

pub mod scheduler;

use crate::sync::spinlock::SpinLock;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::Thread;

/// A possible state of a fiber.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum FiberState {
    /// Fiber is ready to run but not on a virtual core.
    Runnable,
    /// Fiber is running on a virtual core.
    Running,
    /// Fiber is blocked on a synchronization primitive.
    Blocked(BlockReason),
    /// Fiber has finished.
    Exited,
}

/// Why a fiber blocked.
///
/// Passed to [`scheduler::Scheduler::fiber_has_blocked`] so a 2LS can account
/// for the block before the fiber becomes visible to wakers.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BlockReason {
    /// Blocked on a mutex, semaphore, condition variable, or rwlock.
    Mutex,
    /// Blocked for a reason outside this crate.
    Other,
}

/// A handle to a fiber.
///
/// The handle is owned by the scheduler and borrowed (via [`Arc`]) by the
/// synchronization primitives while the fiber sleeps on one of their wait
/// queues. A fiber is linked into **at most one** wait queue at any time;
/// [`crate::sync::WaitQueue`] checks this on every enqueue.
pub struct Fiber {
    tid: u64,
    name: String,
    pub(crate) state: SpinLock<FiberState>,
    /// The OS thread serving as this fiber's virtual core, bound on first run.
    exec: spin::Once<Thread>,
    /// Wait-queue membership flag, the Rust rendering of an intrusive link.
    queued: AtomicBool,
}

impl Fiber {
    pub(crate) fn new(name: String) -> Arc<Self> {
        static TID: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name,
            state: SpinLock::new(FiberState::Runnable),
            exec: spin::Once::new(),
            queued: AtomicBool::new(false),
        })
    }

    /// Wrap the calling OS thread in a fiber handle.
    ///
    /// Used by the host scheduler when a thread that was not spawned through
    /// [`FiberBuilder`] (e.g. the test main thread) first touches a blocking
    /// primitive.
    pub(crate) fn adopt() -> Arc<Self> {
        let os = std::thread::current();
        let fiber = Self::new(String::from(os.name().unwrap_or("<external>")));
        fiber.bind_exec(os);
        *fiber.state.lock() = FiberState::Running;
        fiber
    }

    /// This fiber's id. Unique and nonzero.
    pub fn tid(&self) -> u64 {
        self.tid
    }

    /// This fiber's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A snapshot of this fiber's state.
    pub fn state(&self) -> FiberState {
        *self.state.lock()
    }

    pub(crate) fn bind_exec(&self, os: Thread) {
        self.exec.call_once(|| os);
    }

    pub(crate) fn exec_handle(&self) -> Option<&Thread> {
        self.exec.get()
    }

    /// Mark this fiber as linked on a wait queue.
    ///
    /// Panics if it already is: sleeping on two queues at once corrupts both.
    pub(crate) fn mark_queued(&self) {
        assert!(
            !self.queued.swap(true, Ordering::AcqRel),
            "fiber {} ({}) is already on a wait queue",
            self.tid,
            self.name
        );
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

/// A handle to join a fiber spawned with [`FiberBuilder`].
pub struct JoinHandle {
    fiber: Arc<Fiber>,
    inner: std::thread::JoinHandle<()>,
}

impl JoinHandle {
    /// The fiber id of this handle.
    pub fn tid(&self) -> u64 {
        self.fiber.tid()
    }

    /// A snapshot of the underlying fiber's state.
    ///
    /// Useful for asserting that a fiber parked on a primitive is actually
    /// in [`FiberState::Blocked`] rather than spinning.
    pub fn state(&self) -> FiberState {
        self.fiber.state()
    }

    /// Wait for the fiber to finish.
    ///
    /// If the fiber panicked, the panic is resumed on the joining fiber.
    pub fn join(self) {
        if let Err(payload) = self.inner.join() {
            std::panic::resume_unwind(payload);
        }
    }
}

/// A builder for a new fiber on the host runtime.
///
/// Each spawned fiber is backed by a dedicated OS thread that acts as its
/// virtual core: the fiber "yields" by parking that thread and is made
/// runnable again by unparking it. A 2LS that multiplexes many fibers on few
/// cores replaces this via [`scheduler::set_scheduler`] and its own spawn
/// path; the synchronization primitives only ever talk to the
/// [`scheduler::Scheduler`] trait.
pub struct FiberBuilder {
    name: String,
}

impl FiberBuilder {
    /// Create a builder for a fiber called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Spawn the fiber.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, fiber_fn: F) -> JoinHandle {
        let fiber = Fiber::new(self.name.clone());
        let fiber2 = fiber.clone();
        let inner = std::thread::Builder::new()
            .name(self.name)
            .spawn(move || {
                fiber2.bind_exec(std::thread::current());
                scheduler::install_current(fiber2.clone());
                *fiber2.state.lock() = FiberState::Running;
                fiber_fn();
                *fiber2.state.lock() = FiberState::Exited;
            })
            .expect("failed to spawn a virtual core for the fiber");
        JoinHandle { fiber, inner }
    }
}

/// The fiber running on the current virtual core.
pub fn current() -> Arc<Fiber> {
    scheduler::scheduler().current()
}

std::thread_local! {
    /// Depth of nested non-blocking scopes on this virtual core.
    static NON_BLOCKING: Cell<u32> = const { Cell::new(0) };
}

/// Panic unless the current context is allowed to block.
///
/// Alarm handlers (and any other code wrapped in
/// [`with_nonblocking_context`]) run on contexts that must not yield; every
/// potentially blocking entry point of [`crate::sync`] calls this first.
pub fn assert_can_block() {
    assert!(
        NON_BLOCKING.get() == 0,
        "blocking call from a non-blocking context"
    );
}

/// Run `f` in a context where blocking is forbidden.
///
/// While `f` runs, [`assert_can_block`] panics on this virtual core. Used by
/// alarm drivers around timeout handlers; available to 2LS implementations
/// for their own callback contexts.
pub fn with_nonblocking_context<R>(f: impl FnOnce() -> R) -> R {
    NON_BLOCKING.set(NON_BLOCKING.get() + 1);
    let ret = f();
    NON_BLOCKING.set(NON_BLOCKING.get() - 1);
    ret
}
