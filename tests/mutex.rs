mod common;

use common::wait_until_blocked;
use fibersync::fiber::{BlockReason, FiberBuilder, FiberState};
use fibersync::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn mutual_exclusion() {
    const FIBERS: usize = 32;
    const ROUNDS: usize = 100;
    let mtx = Arc::new(Mutex::new());
    let in_section = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));

    let handles = (0..FIBERS)
        .map(|i| {
            let (mtx, in_section, entered) =
                (mtx.clone(), in_section.clone(), entered.clone());
            FiberBuilder::new(format!("contender-{i}")).spawn(move || {
                for _ in 0..ROUNDS {
                    mtx.lock();
                    assert!(
                        !in_section.swap(true, Ordering::SeqCst),
                        "two fibers inside the critical section"
                    );
                    entered.fetch_add(1, Ordering::SeqCst);
                    in_section.store(false, Ordering::SeqCst);
                    mtx.unlock();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join();
    }
    assert_eq!(entered.load(Ordering::SeqCst), FIBERS * ROUNDS);
}

#[test]
fn contender_parks() {
    let mtx = Arc::new(Mutex::new());
    mtx.lock();

    let blockee = {
        let mtx = mtx.clone();
        FiberBuilder::new("blockee").spawn(move || {
            mtx.lock();
            mtx.unlock();
        })
    };
    wait_until_blocked(&blockee);
    assert_eq!(blockee.state(), FiberState::Blocked(BlockReason::Mutex));

    mtx.unlock();
    blockee.join();
}

#[test]
fn try_lock_never_parks() {
    let mtx = Mutex::new();
    assert!(mtx.try_lock());
    assert!(!mtx.try_lock());
    mtx.unlock();
    assert!(mtx.try_lock());
    mtx.unlock();
}

#[test]
fn timed_lock_times_out_and_leaves_lock_clean() {
    let mtx = Arc::new(Mutex::new());
    mtx.lock();

    let waiter = {
        let mtx = mtx.clone();
        FiberBuilder::new("waiter").spawn(move || {
            let start = Instant::now();
            let got = mtx.timed_lock(start + Duration::from_millis(50));
            let elapsed = start.elapsed();
            assert!(!got);
            assert!(elapsed >= Duration::from_millis(50), "woke early: {elapsed:?}");
            assert!(elapsed < Duration::from_millis(100), "woke late: {elapsed:?}");
        })
    };
    waiter.join();

    // The expired waiter must be off the queue: this unlock frees the lock
    // instead of waking a ghost.
    mtx.unlock();
    assert!(mtx.try_lock());
    mtx.unlock();
}

#[test]
fn timed_lock_wins_when_unlocked_in_time() {
    let mtx = Arc::new(Mutex::new());
    mtx.lock();

    let waiter = {
        let mtx = mtx.clone();
        FiberBuilder::new("waiter").spawn(move || {
            assert!(mtx.timed_lock(Instant::now() + Duration::from_millis(500)));
            mtx.unlock();
        })
    };
    wait_until_blocked(&waiter);
    mtx.unlock();
    waiter.join();
}

#[test]
fn lock_unlock_roundtrip_restores_initial_state() {
    let mtx = Mutex::new();
    mtx.lock();
    mtx.unlock();
    assert!(mtx.try_lock());
    mtx.unlock();
}

static STATIC_MTX: Mutex = Mutex::new();

#[test]
fn static_storage_is_a_valid_mutex() {
    STATIC_MTX.lock();
    assert!(!STATIC_MTX.try_lock());
    STATIC_MTX.unlock();
}
