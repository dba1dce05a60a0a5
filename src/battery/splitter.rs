use std::sync::Arc;
use std::time::Duration;

use super::{Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Meter};
use crate::clock::SharedClock;
use crate::directory::Lookup;
use crate::error::Result;
use crate::policy::SplitterPolicy;

/// Named handle onto one partition of a policy.
///
/// The policy holds all partition state; this type only forwards its own
/// name and keeps the partition's meter.
pub struct SplitterBattery {
    name: String,
    policy: String,
    lookup: Lookup,
    meter: Meter,
    sample_period: Duration,
}

impl SplitterBattery {
    /// Creates a handle for partition `name` of `policy`.
    ///
    /// The meter starts empty; the owner re-seeds it once the partition is
    /// registered.
    pub fn new(
        name: impl Into<String>,
        policy: impl Into<String>,
        lookup: Lookup,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            policy: policy.into(),
            lookup,
            meter: Meter::new(clock, 0.0),
            sample_period: DEFAULT_SAMPLE_PERIOD,
        }
    }

    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    pub fn policy_name(&self) -> &str {
        &self.policy
    }

    fn policy(&self) -> Result<Arc<dyn SplitterPolicy>> {
        self.lookup.policy(&self.policy)
    }
}

impl Battery for SplitterBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Splitter
    }

    fn meter(&self) -> &Meter {
        &self.meter
    }

    fn sample_period(&self) -> Duration {
        self.sample_period
    }

    fn refresh(&self) -> Result<BatteryStatus> {
        self.policy()?.refresh()?;
        self.get_status()
    }

    fn get_status(&self) -> Result<BatteryStatus> {
        let status = self.policy()?.get_status(&self.name)?;
        self.meter.observe(status.current);
        Ok(status)
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let old = self.get_status()?.current;
        let policy = self.policy()?;
        policy.set_current(&self.name, target)?;
        let new = policy.get_status(&self.name)?.current;
        self.meter.update(old, new);
        Ok(())
    }

    fn reset_meter(&self) -> Result<()> {
        self.policy()?.reset_meter(&self.name)
    }
}
