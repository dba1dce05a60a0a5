//! Partitioning policies for splitter batteries.
//!
//! A policy owns the bookkeeping for every partition of one source battery.
//! [`SplitterBattery`](crate::battery::SplitterBattery) handles are thin:
//! each of their operations is forwarded here with the handle's own name.

pub mod proportional;
pub mod tranche;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::battery::BatteryStatus;
use crate::error::{BosError, Result};

pub use proportional::ProportionalPolicy;
pub use tranche::TranchePolicy;

/// Tolerance for floating-point comparisons on scales and voltages.
pub const EPSILON: f64 = 1e-9;

/// Which allocation strategy a policy implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Proportional,
    Tranche,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proportional => "proportional",
            Self::Tranche => "tranche",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a new partition takes its resources from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitPlacement {
    /// Carve the partition out of an existing, idle partition.
    From(String),
    /// Insert into an ordered list: `-1` appends, `0` prepends.
    Position(isize),
}

/// Fractions of a source's state of charge, capacity and rates.
///
/// Each dimension lies in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub state_of_charge: f64,
    pub max_capacity: f64,
    pub max_discharge_rate: f64,
    pub max_charge_rate: f64,
}

impl Scale {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if any fraction lies outside `[0, 1]`.
    pub fn new(
        state_of_charge: f64,
        max_capacity: f64,
        max_discharge_rate: f64,
        max_charge_rate: f64,
    ) -> Result<Self> {
        let scale = Self {
            state_of_charge,
            max_capacity,
            max_discharge_rate,
            max_charge_rate,
        };
        if scale.dims().iter().any(|d| !(0.0..=1.0).contains(d)) {
            return Err(BosError::InvalidArgument(format!(
                "scale fractions must lie in [0, 1]: {scale}"
            )));
        }
        Ok(scale)
    }

    /// The whole source.
    pub fn full() -> Self {
        Self {
            state_of_charge: 1.0,
            max_capacity: 1.0,
            max_discharge_rate: 1.0,
            max_charge_rate: 1.0,
        }
    }

    pub fn zero() -> Self {
        Self {
            state_of_charge: 0.0,
            max_capacity: 0.0,
            max_discharge_rate: 0.0,
            max_charge_rate: 0.0,
        }
    }

    /// Fraction of `total` that `part` represents on each dimension.
    ///
    /// A zero total yields a zero fraction.
    pub fn ratio(part: &BatteryStatus, total: &BatteryStatus) -> Self {
        fn frac(a: f64, b: f64) -> f64 {
            if b > 0.0 { (a / b).clamp(0.0, 1.0) } else { 0.0 }
        }
        Self {
            state_of_charge: frac(part.state_of_charge, total.state_of_charge),
            max_capacity: frac(part.max_capacity, total.max_capacity),
            max_discharge_rate: frac(part.max_discharging_current, total.max_discharging_current),
            max_charge_rate: frac(part.max_charging_current, total.max_charging_current),
        }
    }

    /// Subtracts `other` dimension by dimension.
    ///
    /// # Errors
    ///
    /// Returns `NoResources` if any dimension would go negative.
    pub fn checked_sub(&self, other: &Scale) -> Result<Self> {
        let diff = [
            self.state_of_charge - other.state_of_charge,
            self.max_capacity - other.max_capacity,
            self.max_discharge_rate - other.max_discharge_rate,
            self.max_charge_rate - other.max_charge_rate,
        ];
        if diff.iter().any(|d| *d < -EPSILON) {
            return Err(BosError::NoResources(format!(
                "cannot take {other} out of {self}"
            )));
        }
        let [soc, cap, dis, chg] = diff.map(|d| d.max(0.0));
        Ok(Self {
            state_of_charge: soc,
            max_capacity: cap,
            max_discharge_rate: dis,
            max_charge_rate: chg,
        })
    }

    /// Adds `other` dimension by dimension, saturating at 1.
    pub fn saturating_add(&self, other: &Scale) -> Self {
        Self {
            state_of_charge: (self.state_of_charge + other.state_of_charge).min(1.0),
            max_capacity: (self.max_capacity + other.max_capacity).min(1.0),
            max_discharge_rate: (self.max_discharge_rate + other.max_discharge_rate).min(1.0),
            max_charge_rate: (self.max_charge_rate + other.max_charge_rate).min(1.0),
        }
    }

    pub fn dims(&self) -> [f64; 4] {
        [
            self.state_of_charge,
            self.max_capacity,
            self.max_discharge_rate,
            self.max_charge_rate,
        ]
    }

    /// Applies this scale to a source status. Voltage and current are kept.
    pub fn apply(&self, source: &BatteryStatus) -> BatteryStatus {
        BatteryStatus {
            voltage: source.voltage,
            current: source.current,
            state_of_charge: source.state_of_charge * self.state_of_charge,
            max_capacity: source.max_capacity * self.max_capacity,
            max_discharging_current: source.max_discharging_current * self.max_discharge_rate,
            max_charging_current: source.max_charging_current * self.max_charge_rate,
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scale({:.4}, {:.4}, {:.4}, {:.4})",
            self.state_of_charge, self.max_capacity, self.max_discharge_rate, self.max_charge_rate
        )
    }
}

/// One partition in a [`PolicyReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartReport {
    pub name: String,
    pub current: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<Scale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<BatteryStatus>,
}

/// Bookkeeping view of a policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyReport {
    pub name: String,
    pub kind: PolicyKind,
    pub source: String,
    pub parts: Vec<PartReport>,
}

impl PolicyReport {
    /// Sum of the currents recorded for every partition.
    pub fn net_current(&self) -> f64 {
        self.parts.iter().map(|p| p.current).sum()
    }

    pub fn part(&self, name: &str) -> Option<&PartReport> {
        self.parts.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for PolicyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} policy \"{}\" over \"{}\"", self.kind, self.name, self.source)?;
        for part in &self.parts {
            write!(f, "  {:<16} I={:>8.3} A", part.name, part.current)?;
            if let Some(scale) = &part.scale {
                write!(f, "  {scale}")?;
            }
            if let Some(target) = &part.target {
                write!(f, "  target: {target}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Partition bookkeeping for one source battery.
///
/// Implementations serialize their own operations and never hold their
/// lock across a call that could re-enter another policy.
pub trait SplitterPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PolicyKind;

    /// Name of the partitioned source battery.
    fn source(&self) -> &str;

    /// Refreshes the source battery.
    fn refresh(&self) -> Result<()>;

    /// Status of one partition.
    fn get_status(&self, child: &str) -> Result<BatteryStatus>;

    /// Sets the current of one partition and pushes the net current to the source.
    fn set_current(&self, child: &str, target: f64) -> Result<()>;

    /// Creates a partition, returning the status it actually received.
    fn add_child(
        &self,
        child: &str,
        target: BatteryStatus,
        placement: &SplitPlacement,
    ) -> Result<BatteryStatus>;

    /// Dissolves a partition, merging its accounting into `merge_into` where
    /// the policy supports it.
    fn remove_child(&self, child: &str, merge_into: Option<&str>) -> Result<()>;

    /// Re-seeds the meter of a partition's battery handle.
    fn reset_meter(&self, child: &str) -> Result<()>;

    /// Partition names in policy order.
    fn children(&self) -> Vec<String>;

    fn report(&self) -> Result<PolicyReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_new_bounds() {
        assert!(Scale::new(0.0, 1.0, 0.5, 0.5).is_ok());
        assert!(Scale::new(1.1, 1.0, 0.5, 0.5).is_err());
        assert!(Scale::new(0.5, -0.1, 0.5, 0.5).is_err());
    }

    #[test]
    fn checked_sub_detects_overdraw() {
        let half = Scale::new(0.5, 0.5, 0.5, 0.5).unwrap();
        let rest = Scale::full().checked_sub(&half).unwrap();
        assert_eq!(rest, half);
        assert!(matches!(
            half.checked_sub(&Scale::full()),
            Err(BosError::NoResources(_))
        ));
    }

    #[test]
    fn ratio_of_zero_total_is_zero() {
        let part = BatteryStatus::new(1.0, 0.0, 5.0, 10.0, 1.0, 1.0);
        let total = BatteryStatus::new(1.0, 0.0, 0.0, 20.0, 0.0, 4.0);
        let r = Scale::ratio(&part, &total);
        assert_eq!(r.state_of_charge, 0.0);
        assert_eq!(r.max_capacity, 0.5);
        assert_eq!(r.max_discharge_rate, 0.0);
        assert_eq!(r.max_charge_rate, 0.25);
    }

    #[test]
    fn saturating_add_caps_at_one() {
        let s = Scale::full().saturating_add(&Scale::full());
        assert_eq!(s, Scale::full());
    }
}
