use std::time::Duration;

use parking_lot::Mutex;

use super::{Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Meter};
use crate::clock::SharedClock;
use crate::error::Result;

/// A leaf battery whose status is injected by the caller.
///
/// `PseudoBattery` behaves like a real leaf (range checks, meter
/// bookkeeping) but never changes its own state of charge; tests and
/// simulations drive it through [`PseudoBattery::set_status`].
pub struct PseudoBattery {
    name: String,
    meter: Meter,
    status: Mutex<BatteryStatus>,
    sample_period: Duration,
}

impl PseudoBattery {
    /// Creates a pseudo battery reporting `status`.
    ///
    /// The meter starts at `status.state_of_charge`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `status` violates its invariants.
    pub fn new(name: impl Into<String>, status: BatteryStatus, clock: SharedClock) -> Result<Self> {
        status.validate()?;
        Ok(Self {
            name: name.into(),
            meter: Meter::new(clock, status.state_of_charge),
            status: Mutex::new(status),
            sample_period: DEFAULT_SAMPLE_PERIOD,
        })
    }

    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    /// Overwrites the reported status.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `status` violates its invariants.
    pub fn set_status(&self, status: BatteryStatus) -> Result<()> {
        status.validate()?;
        let _node = self.meter.lock();
        let old = {
            let mut current = self.status.lock();
            let old = current.current;
            *current = status;
            old
        };
        self.meter.observe(old);
        self.meter.update(old, status.current);
        Ok(())
    }
}

impl Battery for PseudoBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Pseudo
    }

    fn meter(&self) -> &Meter {
        &self.meter
    }

    fn sample_period(&self) -> Duration {
        self.sample_period
    }

    fn refresh(&self) -> Result<BatteryStatus> {
        self.get_status()
    }

    fn get_status(&self) -> Result<BatteryStatus> {
        let _node = self.meter.lock();
        let status = *self.status.lock();
        self.meter.update(status.current, status.current);
        Ok(status)
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let _node = self.meter.lock();
        let old = {
            let mut status = self.status.lock();
            status.check_current(target)?;
            let old = status.current;
            status.current = target;
            old
        };
        self.meter.observe(old);
        self.meter.update(old, target);
        Ok(())
    }
}
