//! Absolute-time alarm service.
//!
//! The timed variants of the blocking primitives need one thing from the
//! platform: "run this handler at time T, unless I cancel first, and make
//! cancellation synchronous with the handler". That contract is the
//! [`AlarmDriver`] trait. A driver is installed at most once with
//! [`set_alarm_driver`]; when none is installed, the built-in host driver is
//! used, which backs each armed alarm with a timer thread.
//!
//! Handlers run in a non-blocking context: they may take spinlocks and call
//! [`Scheduler::make_runnable`], but any attempt to block in one panics via
//! [`crate::fiber::assert_can_block`].
//!
//! [`Scheduler::make_runnable`]: crate::fiber::scheduler::Scheduler::make_runnable

use crate::sync::spinlock::SpinLock;
use core::sync::atomic::{AtomicU64, Ordering};
use log::trace;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar as StdCondvar, Mutex as StdMutex};
use std::time::Instant;

/// Identifies an armed alarm for cancellation.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct AlarmId(u64);

/// The callback an alarm fires.
pub type AlarmHandler = Box<dyn FnOnce() + Send>;

/// A one-shot absolute-deadline timer service.
pub trait AlarmDriver: Sync {
    /// Arm `handler` to run once at `deadline`.
    fn arm_at(&self, deadline: Instant, handler: AlarmHandler) -> AlarmId;

    /// Cancel an armed alarm.
    ///
    /// Blocks until the alarm is either cancelled or its handler has run to
    /// completion. On return, the handler is guaranteed not to be running and
    /// never will, which is what lets a timed waiter read its timeout flag
    /// without racing the handler.
    fn cancel(&self, id: AlarmId);
}

static DRIVER: spin::Once<&'static dyn AlarmDriver> = spin::Once::new();
static HOST: HostAlarm = HostAlarm;

/// Install the process-wide alarm driver.
///
/// Must be called at most once, before any timed wait. Panics if a driver is
/// already installed.
pub fn set_alarm_driver(driver: impl AlarmDriver + 'static) {
    let mut installed = false;
    DRIVER.call_once(|| {
        installed = true;
        let driver: &'static dyn AlarmDriver = Box::leak(Box::new(driver));
        driver
    });
    assert!(installed, "an alarm driver is already installed");
    trace!("alarm driver installed");
}

/// The installed driver, or the built-in host driver.
pub fn alarm_driver() -> &'static dyn AlarmDriver {
    DRIVER.get().copied().unwrap_or(&HOST)
}

enum SlotState {
    Armed,
    Cancelled,
    Firing,
    Done,
}

struct AlarmSlot {
    state: StdMutex<SlotState>,
    signal: StdCondvar,
}

static SLOTS: SpinLock<BTreeMap<u64, Arc<AlarmSlot>>> = SpinLock::new(BTreeMap::new());
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The built-in driver: one timer thread per armed alarm.
///
/// Plenty for a host runtime where timed waits are rare and short-lived; a
/// real 2LS would replace this with its timer wheel.
struct HostAlarm;

impl AlarmDriver for HostAlarm {
    fn arm_at(&self, deadline: Instant, handler: AlarmHandler) -> AlarmId {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(AlarmSlot {
            state: StdMutex::new(SlotState::Armed),
            signal: StdCondvar::new(),
        });
        SLOTS.lock().insert(id, slot.clone());
        trace!("alarm {id} armed");
        std::thread::Builder::new()
            .name(format!("alarm-{id}"))
            .spawn(move || {
                let mut state = slot.state.lock().unwrap();
                loop {
                    match *state {
                        SlotState::Cancelled => {
                            *state = SlotState::Done;
                            slot.signal.notify_all();
                            drop(state);
                            SLOTS.lock().remove(&id);
                            return;
                        }
                        SlotState::Armed => {
                            let now = Instant::now();
                            if now >= deadline {
                                break;
                            }
                            let (guard, _) =
                                slot.signal.wait_timeout(state, deadline - now).unwrap();
                            state = guard;
                        }
                        SlotState::Firing | SlotState::Done => unreachable!(),
                    }
                }
                *state = SlotState::Firing;
                drop(state);
                trace!("alarm {id} fired");
                crate::fiber::with_nonblocking_context(handler);
                let mut state = slot.state.lock().unwrap();
                *state = SlotState::Done;
                slot.signal.notify_all();
                drop(state);
                SLOTS.lock().remove(&id);
            })
            .expect("failed to spawn alarm timer");
        AlarmId(id)
    }

    fn cancel(&self, AlarmId(id): AlarmId) {
        // Absent from the table means the handler already ran to completion.
        let Some(slot) = SLOTS.lock().remove(&id) else {
            return;
        };
        let mut state = slot.state.lock().unwrap();
        if matches!(*state, SlotState::Armed) {
            *state = SlotState::Cancelled;
            slot.signal.notify_all();
        }
        while !matches!(*state, SlotState::Done) {
            state = slot.signal.wait(state).unwrap();
        }
        trace!("alarm {id} cancelled");
    }
}
