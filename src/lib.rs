//! # fibersync: blocking synchronization for cooperative fibers
//!
//! This crate provides the parking primitives (counting semaphores,
//! mutexes, recursive mutexes, condition variables, and reader-writer
//! locks) for an M:N threading runtime: many *fibers* multiplexed onto a
//! smaller set of *virtual cores*, scheduled cooperatively. A fiber that
//! cannot make progress never traps into the kernel on the fast path;
//! instead it yields to the scheduler with a callback that atomically links
//! it onto the primitive's wait queue.
//!
//! The scheduling policy is pluggable. The primitives talk to a *second
//! level scheduler* (2LS) through the
//! [`Scheduler`](fiber::scheduler::Scheduler) trait, which also lets the 2LS
//! substitute its own wait-queue ordering. Out of the box a host 2LS is
//! provided that backs each fiber with an OS thread, so the crate is usable
//! (and its tests run) without an external runtime:
//!
//! ```
//! use fibersync::fiber::FiberBuilder;
//! use fibersync::sync::{Condvar, Mutex};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! static READY: AtomicBool = AtomicBool::new(false);
//! static LOCK: Mutex = Mutex::new();
//! static COND: Condvar = Condvar::new();
//!
//! let waiter = FiberBuilder::new("waiter").spawn(|| {
//!     LOCK.lock();
//!     while !READY.load(Ordering::Relaxed) {
//!         COND.wait(&LOCK);
//!     }
//!     LOCK.unlock();
//! });
//!
//! LOCK.lock();
//! READY.store(true, Ordering::Relaxed);
//! COND.signal();
//! LOCK.unlock();
//! waiter.join();
//! ```
//!
//! Timed variants take an absolute [`std::time::Instant`] deadline and are
//! driven by a pluggable [`alarm`] service; `try` variants never park.
//! Misuse (unlocking a recursive mutex from a non-owner, blocking from an
//! alarm handler, dropping a primitive with sleepers) is a panic, not an
//! error code.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod alarm;
pub mod fiber;
pub mod sync;
