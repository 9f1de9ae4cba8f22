mod common;

use common::{settle, wait_until, wait_until_blocked};
use fibersync::fiber::FiberBuilder;
use fibersync::sync::{Condvar, Mutex, RecurseMutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[test]
fn producer_consumer_strict_alternation() {
    const ITEMS: u64 = 1_000;
    const EMPTY: u64 = 0;

    let mtx = Arc::new(Mutex::new());
    let item_ready = Arc::new(Condvar::new());
    let slot_free = Arc::new(Condvar::new());
    // Single-slot buffer guarded by `mtx`; 0 means empty.
    let slot = Arc::new(AtomicU64::new(EMPTY));

    let producer = {
        let (mtx, item_ready, slot_free, slot) =
            (mtx.clone(), item_ready.clone(), slot_free.clone(), slot.clone());
        FiberBuilder::new("producer").spawn(move || {
            for i in 1..=ITEMS {
                mtx.lock();
                while slot.load(Ordering::Relaxed) != EMPTY {
                    slot_free.wait(&mtx);
                }
                slot.store(i, Ordering::Relaxed);
                item_ready.signal();
                mtx.unlock();
            }
        })
    };
    let consumer = {
        let (mtx, item_ready, slot_free, slot) =
            (mtx.clone(), item_ready.clone(), slot_free.clone(), slot.clone());
        FiberBuilder::new("consumer").spawn(move || {
            for expected in 1..=ITEMS {
                mtx.lock();
                while slot.load(Ordering::Relaxed) == EMPTY {
                    item_ready.wait(&mtx);
                }
                // One slot forces strict producer/consumer alternation.
                assert_eq!(slot.swap(EMPTY, Ordering::Relaxed), expected);
                slot_free.signal();
                mtx.unlock();
            }
        })
    };

    producer.join();
    consumer.join();
    assert_eq!(slot.load(Ordering::Relaxed), EMPTY);
}

#[test]
fn timed_wait_times_out_with_mutex_held() {
    let mtx = Mutex::new();
    let cv = Condvar::new();

    mtx.lock();
    let start = Instant::now();
    let signalled = cv.timed_wait(&mtx, start + Duration::from_millis(50));
    let elapsed = start.elapsed();
    assert!(!signalled);
    assert!(elapsed >= Duration::from_millis(50), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(100), "woke late: {elapsed:?}");

    // The mutex was reacquired on the timeout path.
    assert!(!mtx.try_lock());
    mtx.unlock();
    assert!(mtx.try_lock());
    mtx.unlock();
}

#[test]
fn timed_wait_beaten_by_signal() {
    let mtx = Arc::new(Mutex::new());
    let cv = Arc::new(Condvar::new());
    let flag = Arc::new(AtomicBool::new(false));

    mtx.lock();
    let signaller = {
        let (mtx, cv, flag) = (mtx.clone(), cv.clone(), flag.clone());
        FiberBuilder::new("signaller").spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            mtx.lock();
            flag.store(true, Ordering::Relaxed);
            cv.signal();
            mtx.unlock();
        })
    };

    let signalled = cv.timed_wait(&mtx, Instant::now() + Duration::from_millis(500));
    assert!(signalled);
    assert!(flag.load(Ordering::Relaxed));
    mtx.unlock();
    signaller.join();
}

fn spawn_waiter(
    name: &str,
    mtx: &Arc<Mutex>,
    cv: &Arc<Condvar>,
    woken: &Arc<AtomicUsize>,
) -> fibersync::fiber::JoinHandle {
    let (mtx, cv, woken) = (mtx.clone(), cv.clone(), woken.clone());
    let handle = FiberBuilder::new(name).spawn(move || {
        mtx.lock();
        cv.wait(&mtx);
        woken.fetch_add(1, Ordering::SeqCst);
        mtx.unlock();
    });
    // The only place this fiber can park before the signal is the cv wait.
    wait_until_blocked(&handle);
    handle
}

#[test]
fn signal_wakes_exactly_one() {
    let mtx = Arc::new(Mutex::new());
    let cv = Arc::new(Condvar::new());
    let woken = Arc::new(AtomicUsize::new(0));

    let handles = (0..4)
        .map(|i| spawn_waiter(&format!("waiter-{i}"), &mtx, &cv, &woken))
        .collect::<Vec<_>>();

    cv.signal();
    wait_until(|| woken.load(Ordering::SeqCst) == 1);
    settle();
    assert_eq!(woken.load(Ordering::SeqCst), 1, "signal woke more than one");

    cv.broadcast();
    for handle in handles {
        handle.join();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 4);
}

#[test]
fn broadcast_wakes_present_not_future_waiters() {
    let mtx = Arc::new(Mutex::new());
    let cv = Arc::new(Condvar::new());
    let woken = Arc::new(AtomicUsize::new(0));

    let early_a = spawn_waiter("early-a", &mtx, &cv, &woken);
    let early_b = spawn_waiter("early-b", &mtx, &cv, &woken);

    cv.broadcast();
    early_a.join();
    early_b.join();
    assert_eq!(woken.load(Ordering::SeqCst), 2);

    // A fiber enqueued after the broadcast waits for the next wakeup.
    let late = spawn_waiter("late", &mtx, &cv, &woken);
    settle();
    assert_eq!(woken.load(Ordering::SeqCst), 2, "broadcast leaked forward");
    cv.signal();
    late.join();
    assert_eq!(woken.load(Ordering::SeqCst), 3);
}

#[test]
fn broadcast_on_empty_cv_is_a_noop() {
    let mtx = Arc::new(Mutex::new());
    let cv = Arc::new(Condvar::new());
    cv.broadcast();

    // Still a working cv afterwards.
    let woken = Arc::new(AtomicUsize::new(0));
    let waiter = spawn_waiter("waiter", &mtx, &cv, &woken);
    cv.signal();
    waiter.join();
    assert_eq!(woken.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_recurse_preserves_lock_depth() {
    let rmtx = Arc::new(RecurseMutex::new());
    let cv = Arc::new(Condvar::new());
    let resumed = Arc::new(AtomicBool::new(false));

    let waiter = {
        let (rmtx, cv, resumed) = (rmtx.clone(), cv.clone(), resumed.clone());
        FiberBuilder::new("waiter").spawn(move || {
            rmtx.lock();
            rmtx.lock();
            rmtx.lock();
            cv.wait_recurse(&rmtx);
            resumed.store(true, Ordering::SeqCst);
            // All three levels are ours again; only the last unlock frees it.
            rmtx.unlock();
            rmtx.unlock();
            rmtx.unlock();
        })
    };
    wait_until_blocked(&waiter);

    // The wait released all three levels at once, or this lock would park.
    assert!(rmtx.try_lock());
    cv.signal();
    rmtx.unlock();
    waiter.join();
    assert!(resumed.load(Ordering::SeqCst));
    assert!(rmtx.try_lock());
    rmtx.unlock();
}

#[test]
fn timed_wait_recurse_timeout_restores_depth() {
    let rmtx = RecurseMutex::new();
    let cv = Condvar::new();

    rmtx.lock();
    rmtx.lock();
    let signalled = cv.timed_wait_recurse(&rmtx, Instant::now() + Duration::from_millis(30));
    assert!(!signalled);
    // Depth two again: both unlocks are owed.
    rmtx.unlock();
    assert!(rmtx.try_lock());
    rmtx.unlock();
    rmtx.unlock();
}
