//! Blocking synchronization primitives.
//!
//! Everything here parks the calling fiber instead of spinning: a fiber that
//! cannot make progress is handed back to the scheduler, linked on the
//! primitive's wait queue, and woken when the primitive is ready for it.
//! Each primitive comes in three flavors per operation: parking, `try_*`
//! (never parks), and `timed_*` (parks with an absolute deadline).
//!
//! - [`Semaphore`]: counting semaphore, the foundation everything else
//!   stands on.
//! - [`Mutex`]: a semaphore with one unit.
//! - [`RecurseMutex`]: a mutex the holder may re-lock.
//! - [`Condvar`]: sleep until a mutex-guarded predicate changes.
//! - [`RwLock`]: many readers or one writer, writer-preferring.
//!
//! The primitives layer without ordering hazards: the mutex *is* a
//! semaphore, the recursive mutex wraps a mutex it only touches as the
//! holder, and the condition variable releases its own spinlock before it
//! touches the mutex's. All of them talk to the runtime exclusively through
//! [`Scheduler`](crate::fiber::scheduler::Scheduler), so a 2LS can reshape
//! wake order by overriding the wait-queue hooks without touching this
//! module.

pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;
pub(crate) mod timeout;
pub mod waitq;

pub use condvar::Condvar;
pub use mutex::{Mutex, RecurseMutex};
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitq::WaitQueue;
