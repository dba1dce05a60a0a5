//! Placeholder battery with no capacity.

use std::time::Duration;

use super::{Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Meter};
use crate::clock::SharedClock;
use crate::error::{BosError, Result};

/// A battery with a fixed voltage and nothing else.
///
/// Only a zero current is accepted.
pub struct NullBattery {
    name: String,
    voltage: f64,
    meter: Meter,
    sample_period: Duration,
}

impl NullBattery {
    pub fn new(name: impl Into<String>, voltage: f64, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            voltage,
            meter: Meter::new(clock, 0.0),
            sample_period: DEFAULT_SAMPLE_PERIOD,
        }
    }

    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }
}

impl Battery for NullBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Null
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
        self.meter.update(0.0, 0.0);
        Ok(BatteryStatus::empty(self.voltage))
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let _node = self.meter.lock();
        if target != 0.0 {
            return Err(BosError::out_of_range(target, 0.0, 0.0));
        }
        self.meter.update(0.0, 0.0);
        Ok(())
    }
}
