use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;

use super::BatteryStatus;
use crate::clock::{SECONDS_PER_HOUR, SharedClock};

/// Failure reported by a device driver for a single transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverFault {
    /// The device did not answer in time; the transaction may be retried.
    #[error("device timed out")]
    Timeout,
    /// The device answered with an error or garbage.
    #[error("device fault: {0}")]
    Device(String),
}

/// Boundary to a piece of battery hardware.
///
/// Implementations own their wire framing and checksums. Each call is one
/// transaction; retry policy lives in [`PhysicalBattery`](super::PhysicalBattery).
pub trait Driver: Send {
    /// Short label used in logs.
    fn describe(&self) -> String;

    /// Reads the device's current status.
    fn read_status(&mut self) -> Result<BatteryStatus, DriverFault>;

    /// Commands a new current set-point.
    fn write_current(&mut self, current: f64) -> Result<(), DriverFault>;
}

/// Shared handle that makes a [`SimulatedDriver`] fail its next transactions.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    pending_timeouts: Arc<AtomicU32>,
}

impl FaultInjector {
    /// Makes the next `count` transactions time out.
    pub fn inject_timeouts(&self, count: u32) {
        self.pending_timeouts.fetch_add(count, Ordering::SeqCst);
    }

    pub fn pending(&self) -> u32 {
        self.pending_timeouts.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.pending_timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// An in-process battery device.
///
/// State of charge is integrated from the commanded current over clock
/// time. When the pack runs empty while discharging (or full while
/// charging) the current drops to zero. An optional Gaussian noise term
/// perturbs each integration step, standing in for self-discharge and
/// sensor error.
pub struct SimulatedDriver {
    status: BatteryStatus,
    clock: SharedClock,
    last_update: f64,
    /// Standard deviation of per-hour charge noise (Ah).
    noise_std: f64,
    rng: StdRng,
    faults: FaultInjector,
}

impl SimulatedDriver {
    /// Creates a simulated device starting from `initial`.
    ///
    /// # Arguments
    ///
    /// * `initial` - Starting status; its `current` is the initial set-point
    /// * `clock` - Time source for SOC integration
    /// * `noise_std` - Standard deviation of charge noise per hour (0 disables)
    /// * `seed` - Random seed for reproducible noise
    pub fn new(initial: BatteryStatus, clock: SharedClock, noise_std: f64, seed: u64) -> Self {
        let last_update = clock.now();
        Self {
            status: initial,
            clock,
            last_update,
            noise_std,
            rng: StdRng::seed_from_u64(seed),
            faults: FaultInjector::default(),
        }
    }

    /// Handle for injecting transport faults from the outside.
    pub fn faults(&self) -> FaultInjector {
        self.faults.clone()
    }

    fn advance(&mut self) {
        let now = self.clock.now();
        let dt_hours = ((now - self.last_update) / SECONDS_PER_HOUR).max(0.0);
        self.last_update = now;
        if dt_hours == 0.0 {
            return;
        }

        let s = &mut self.status;
        let drawn = s.current * dt_hours + gaussian_noise(&mut self.rng, self.noise_std) * dt_hours;
        s.state_of_charge = (s.state_of_charge - drawn).clamp(0.0, s.max_capacity);

        let empty = s.current > 0.0 && s.state_of_charge <= 0.0;
        let full = s.current < 0.0 && s.state_of_charge >= s.max_capacity;
        if empty || full {
            s.current = 0.0;
        }
    }
}

impl Driver for SimulatedDriver {
    fn describe(&self) -> String {
        "simulated".to_string()
    }

    fn read_status(&mut self) -> Result<BatteryStatus, DriverFault> {
        if self.faults.take() {
            return Err(DriverFault::Timeout);
        }
        self.advance();
        Ok(self.status)
    }

    fn write_current(&mut self, current: f64) -> Result<(), DriverFault> {
        if self.faults.take() {
            return Err(DriverFault::Timeout);
        }
        if !self.status.accepts(current) {
            return Err(DriverFault::Device(format!(
                "set-point {current} rejected"
            )));
        }
        self.advance();
        self.status.current = current;
        Ok(())
    }
}

/// Gaussian noise via the Box-Muller transform.
///
/// Returns 0 when `std_dev` is not positive.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}
