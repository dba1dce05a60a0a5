//! Expected-charge ledger and per-node lock.

use std::cell::RefCell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::clock::{SECONDS_PER_HOUR, SharedClock};

/// Ledger fields guarded by the node lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterState {
    /// Expected charge remaining (Ah), integrated from observed currents.
    pub meter: f64,
    /// Current recorded at the last update (A).
    pub current: f64,
    /// Clock reading of the last update (s).
    pub timestamp: f64,
}

/// Guard held for the duration of a node operation.
pub type NodeGuard<'a> = ReentrantMutexGuard<'a, RefCell<MeterState>>;

/// A node's meter and its reentrant lock.
///
/// Every battery owns exactly one `Meter`. Leaf operations hold
/// [`Meter::lock`] for their full read-modify-write; because the lock is
/// reentrant, the ledger accessors below can be called while it is held.
/// Composite batteries never hold it while calling into another node.
pub struct Meter {
    clock: SharedClock,
    state: ReentrantMutex<RefCell<MeterState>>,
}

impl Meter {
    /// Creates a ledger seeded with `initial` Ah, stamped at the current time.
    pub fn new(clock: SharedClock, initial: f64) -> Self {
        let timestamp = clock.now();
        Self {
            clock,
            state: ReentrantMutex::new(RefCell::new(MeterState {
                meter: initial,
                current: 0.0,
                timestamp,
            })),
        }
    }

    /// Acquires the node lock.
    pub fn lock(&self) -> NodeGuard<'_> {
        self.state.lock()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Returns a copy of the ledger.
    pub fn snapshot(&self) -> MeterState {
        *self.state.lock().borrow()
    }

    pub fn get(&self) -> f64 {
        self.snapshot().meter
    }

    pub fn set(&self, value: f64) {
        self.state.lock().borrow_mut().meter = value;
    }

    /// The current recorded by the last update.
    pub fn current(&self) -> f64 {
        self.snapshot().current
    }

    /// Integrates the charge that flowed since the last update.
    ///
    /// Uses the trapezoid rule over the elapsed clock time:
    /// `meter -= (old_current + new_current) / 2 * Δt_hours`, then records
    /// `new_current` and the current time.
    pub fn update(&self, old_current: f64, new_current: f64) {
        let guard = self.state.lock();
        let now = self.clock.now();
        let mut state = guard.borrow_mut();
        let dt_hours = ((now - state.timestamp) / SECONDS_PER_HOUR).max(0.0);
        state.meter -= (old_current + new_current) / 2.0 * dt_hours;
        state.current = new_current;
        state.timestamp = now;
    }

    /// Records a read of `measured` with no mutation in between.
    pub fn observe(&self, measured: f64) {
        let _guard = self.state.lock();
        let old = self.current();
        self.update(old, measured);
    }
}
