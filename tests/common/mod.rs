#![allow(dead_code)]

use fibersync::fiber::{FiberState, JoinHandle};
use std::time::{Duration, Instant};

/// Spin until `handle`'s fiber is parked on a primitive.
pub fn wait_until_blocked(handle: &JoinHandle) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if matches!(handle.state(), FiberState::Blocked(_)) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "fiber {} never blocked",
            handle.tid()
        );
        std::thread::yield_now();
    }
}

/// Spin until `cond` holds.
pub fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition never became true");
        std::thread::yield_now();
    }
}

/// Give already-woken fibers a moment to run.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(50));
}
