//! Short-critical-section spinlock.
//!
//! Every primitive in this crate guards its state with a spinlock held only
//! across short, non-parking sections, so a plain spin mutex is the right
//! tool: a fiber never parks while holding one, and contention windows are a
//! handful of queue operations. The implementation comes from the [`spin`]
//! crate; this module pins the crate-wide names.
//!
//! The one place two of these locks come near each other is the condition
//! variable's wait path, which releases the cv spinlock before unlocking the
//! paired mutex (whose own spinlock is then taken). See
//! [`crate::sync::condvar`].

pub use spin::{Mutex as SpinLock, MutexGuard as SpinLockGuard};
