use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Driver, DriverFault, Meter};
use crate::clock::SharedClock;
use crate::error::{BosError, Result};

/// Default number of attempts per driver transaction.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A leaf battery backed by a device [`Driver`].
///
/// Reads are cached for one sample period. Timeouts are retried up to
/// `max_attempts` times before surfacing as `DriverError`; any other device
/// fault surfaces immediately.
pub struct PhysicalBattery {
    name: String,
    meter: Meter,
    driver: Mutex<Box<dyn Driver>>,
    max_attempts: u32,
    /// Last status read from the device and the clock reading it was taken at.
    cache: Mutex<(BatteryStatus, f64)>,
    sample_period: Duration,
}

impl PhysicalBattery {
    /// Connects to `driver` and takes an initial reading.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `max_attempts` is zero and `DriverError`
    /// if the initial reading fails.
    pub fn new(
        name: impl Into<String>,
        driver: Box<dyn Driver>,
        max_attempts: u32,
        clock: SharedClock,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(BosError::InvalidArgument(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let name = name.into();
        let driver = Mutex::new(driver);
        let status = transact(&name, &driver, max_attempts, |d| d.read_status())?;
        let now = clock.now();
        Ok(Self {
            meter: Meter::new(clock, status.state_of_charge),
            name,
            driver,
            max_attempts,
            cache: Mutex::new((status, now)),
            sample_period: DEFAULT_SAMPLE_PERIOD,
        })
    }

    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    fn read_device(&self) -> Result<BatteryStatus> {
        let status = transact(&self.name, &self.driver, self.max_attempts, |d| {
            d.read_status()
        })?;
        *self.cache.lock() = (status, self.meter.clock().now());
        Ok(status)
    }
}

/// Runs one driver transaction, retrying on timeout.
fn transact<T>(
    name: &str,
    driver: &Mutex<Box<dyn Driver>>,
    max_attempts: u32,
    mut op: impl FnMut(&mut dyn Driver) -> std::result::Result<T, DriverFault>,
) -> Result<T> {
    let mut driver = driver.lock();
    for attempt in 1..=max_attempts {
        match op(driver.as_mut()) {
            Ok(value) => return Ok(value),
            Err(DriverFault::Timeout) => {
                debug!(battery = name, attempt, "driver timeout");
            }
            Err(fault) => {
                return Err(BosError::DriverError(format!(
                    "{} on \"{name}\": {fault}",
                    driver.describe()
                )));
            }
        }
    }
    warn!(battery = name, max_attempts, "driver retries exhausted");
    Err(BosError::DriverError(format!(
        "{} on \"{name}\": timed out after {max_attempts} attempts",
        driver.describe()
    )))
}

impl Battery for PhysicalBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Physical
    }

    fn meter(&self) -> &Meter {
        &self.meter
    }

    fn sample_period(&self) -> Duration {
        self.sample_period
    }

    fn refresh(&self) -> Result<BatteryStatus> {
        let _node = self.meter.lock();
        let status = self.read_device()?;
        self.meter.observe(status.current);
        Ok(status)
    }

    fn get_status(&self) -> Result<BatteryStatus> {
        let _node = self.meter.lock();
        let (cached, taken) = *self.cache.lock();
        let age = self.meter.clock().now() - taken;
        if age >= self.sample_period.as_secs_f64() {
            return self.refresh();
        }
        self.meter.observe(cached.current);
        Ok(cached)
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let _node = self.meter.lock();
        let status = self.get_status()?;
        status.check_current(target)?;
        transact(&self.name, &self.driver, self.max_attempts, |d| {
            d.write_current(target)
        })?;
        self.cache.lock().0.current = target;
        self.meter.update(status.current, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::battery::SimulatedDriver;
    use crate::battery::driver::FaultInjector;
    use crate::clock::DummyClock;

    fn physical(attempts: u32) -> (Arc<DummyClock>, FaultInjector, PhysicalBattery) {
        let (clock, shared) = DummyClock::shared(0.0);
        let status = BatteryStatus::new(3700.0, 0.0, 50.0, 100.0, 10.0, 10.0);
        let driver = SimulatedDriver::new(status, shared.clone(), 0.0, 3);
        let faults = driver.faults();
        let b = PhysicalBattery::new("phy", Box::new(driver), attempts, shared).unwrap();
        (clock, faults, b)
    }

    #[test]
    fn retries_transient_timeouts() {
        let (_clock, faults, b) = physical(3);
        faults.inject_timeouts(2);
        assert!(b.set_current(4.0).is_ok());
        assert_eq!(b.get_status().unwrap().current, 4.0);
    }

    #[test]
    fn exhausted_retries_surface_driver_error() {
        let (_clock, faults, b) = physical(2);
        faults.inject_timeouts(5);
        assert!(matches!(b.set_current(1.0), Err(BosError::DriverError(_))));
    }

    #[test]
    fn cached_reads_within_sample_period() {
        let (clock, _faults, b) = physical(1);
        b.set_current(10.0).unwrap();
        clock.tick(0.5).unwrap();
        let cached = b.get_status().unwrap();
        assert_eq!(cached.state_of_charge, 50.0);

        clock.tick(3600.0).unwrap();
        let fresh = b.get_status().unwrap();
        assert!(fresh.state_of_charge < 41.0);
    }

    #[test]
    fn meter_follows_device() {
        let (clock, _faults, b) = physical(1);
        b.set_current(10.0).unwrap();
        clock.tick(1800.0).unwrap();
        b.refresh().unwrap();
        assert!((b.get_meter() - 45.0).abs() < 1e-6);
        assert!(b.credit().unwrap().abs() < 1e-6);
    }

    #[test]
    fn zero_attempts_rejected() {
        let (_clock, shared) = DummyClock::shared(0.0);
        let driver = SimulatedDriver::new(BatteryStatus::empty(1.0), shared.clone(), 0.0, 0);
        assert!(matches!(
            PhysicalBattery::new("x", Box::new(driver), 0, shared),
            Err(BosError::InvalidArgument(_))
        ));
    }
}
