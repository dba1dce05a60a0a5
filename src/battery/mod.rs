//! The battery capability and its variants.
//!
//! Every logical battery, whether backed by hardware, a remote node, or
//! pure composition, implements [`Battery`]. Composite variants hold only
//! the *names* of their sources and resolve them through a
//! [`Lookup`](crate::directory::Lookup) on each call.

/// Merges several sources into one battery.
pub mod aggregator;
/// Device driver boundary and the simulated device.
pub mod driver;
pub mod meter;
/// Remote battery reached through the node protocol.
pub mod network;
pub mod null;
/// Battery backed by a device driver.
pub mod physical;
/// Battery with an injected, overwritable status.
pub mod pseudo;
/// Partition of a source governed by a splitter policy.
pub mod splitter;
pub mod status;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

pub use aggregator::AggregatorBattery;
pub use driver::{Driver, DriverFault, SimulatedDriver};
pub use meter::Meter;
pub use network::NetworkBattery;
pub use null::NullBattery;
pub use physical::PhysicalBattery;
pub use pseudo::PseudoBattery;
pub use splitter::SplitterBattery;
pub use status::BatteryStatus;

/// Default staleness window and background refresh period.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

/// Tag identifying a battery variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryKind {
    Null,
    Pseudo,
    Physical,
    Network,
    Aggregator,
    Splitter,
}

impl BatteryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Pseudo => "pseudo",
            Self::Physical => "physical",
            Self::Network => "network",
            Self::Aggregator => "aggregator",
            Self::Splitter => "splitter",
        }
    }
}

impl fmt::Display for BatteryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait implemented by every logical battery.
///
/// All methods take `&self`: nodes are shared through the directory and
/// serialize their own mutations behind the lock owned by their [`Meter`].
///
/// # Current Convention
/// - Positive current: discharging
/// - Negative current: charging
pub trait Battery: Send + Sync {
    /// Unique, immutable name of this node.
    fn name(&self) -> &str;

    fn kind(&self) -> BatteryKind;

    /// The node's expected-charge ledger and lock.
    fn meter(&self) -> &Meter;

    /// Staleness window for cached reads and the background refresh period.
    fn sample_period(&self) -> Duration {
        DEFAULT_SAMPLE_PERIOD
    }

    /// Re-synchronizes from whatever this node treats as ground truth.
    ///
    /// Virtual composites only pull and update their meter here; they never
    /// push currents.
    fn refresh(&self) -> Result<BatteryStatus>;

    /// Returns the status of this battery, integrating the meter.
    fn get_status(&self) -> Result<BatteryStatus>;

    /// Requests a new current.
    ///
    /// # Errors
    ///
    /// Fails with `CurrentOutOfRange` when `target` lies outside
    /// `[-max_charging_current, max_discharging_current]`; composites may
    /// report `NoResources` for their own derived bounds.
    fn set_current(&self, target: f64) -> Result<()>;

    fn get_meter(&self) -> f64 {
        self.meter().get()
    }

    fn set_meter(&self, value: f64) {
        self.meter().set(value);
    }

    /// Re-seeds the meter from the latest real state of charge.
    fn reset_meter(&self) -> Result<()> {
        let soc = self.get_status()?.state_of_charge;
        self.set_meter(soc);
        Ok(())
    }

    fn update_meter(&self, old_current: f64, new_current: f64) {
        self.meter().update(old_current, new_current);
    }

    /// Drift between the actual state of charge and the meter (Ah).
    ///
    /// Positive when the battery holds more charge than it accounted for.
    fn credit(&self) -> Result<f64> {
        let soc = self.get_status()?.state_of_charge;
        Ok(soc - self.get_meter())
    }
}
