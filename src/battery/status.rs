use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BosError, Result};

/// A point-in-time reading of a battery.
///
/// # Sign Convention
/// - Positive current: discharging
/// - Negative current: charging
///
/// Charge quantities are in Ah, currents in A, voltage in whatever unit the
/// topology uses consistently (the demo topologies use mV).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage: f64,
    pub current: f64,
    /// Charge remaining (Ah).
    pub state_of_charge: f64,
    /// Capacity when full (Ah).
    pub max_capacity: f64,
    /// Largest discharging current the battery accepts (A, non-negative).
    pub max_discharging_current: f64,
    /// Largest charging current the battery accepts (A, non-negative).
    pub max_charging_current: f64,
}

impl BatteryStatus {
    /// Creates a status from its six fields.
    pub fn new(
        voltage: f64,
        current: f64,
        state_of_charge: f64,
        max_capacity: f64,
        max_discharging_current: f64,
        max_charging_current: f64,
    ) -> Self {
        Self {
            voltage,
            current,
            state_of_charge,
            max_capacity,
            max_discharging_current,
            max_charging_current,
        }
    }

    /// A status with the given voltage and every other field zero.
    pub fn empty(voltage: f64) -> Self {
        Self {
            voltage,
            ..Self::default()
        }
    }

    /// Checks the charge and rate invariants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `state_of_charge` lies outside
    /// `[0, max_capacity]` or a rate limit is negative.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=self.max_capacity).contains(&self.state_of_charge) {
            return Err(BosError::InvalidArgument(format!(
                "state of charge {} outside [0, {}]",
                self.state_of_charge, self.max_capacity
            )));
        }
        if self.max_discharging_current < 0.0 || self.max_charging_current < 0.0 {
            return Err(BosError::InvalidArgument(
                "current limits must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `true` when `current` lies within the accepted range.
    pub fn accepts(&self, current: f64) -> bool {
        (-self.max_charging_current..=self.max_discharging_current).contains(&current)
    }

    /// Fails with `CurrentOutOfRange` unless [`accepts`](Self::accepts) holds.
    pub fn check_current(&self, current: f64) -> Result<()> {
        if self.accepts(current) {
            Ok(())
        } else {
            Err(BosError::out_of_range(
                current,
                -self.max_charging_current,
                self.max_discharging_current,
            ))
        }
    }

    /// Element-wise minimum of the charge and rate fields.
    ///
    /// Voltage and current are taken from `self`.
    pub fn min_with(&self, other: &BatteryStatus) -> BatteryStatus {
        BatteryStatus {
            voltage: self.voltage,
            current: self.current,
            state_of_charge: self.state_of_charge.min(other.state_of_charge),
            max_capacity: self.max_capacity.min(other.max_capacity),
            max_discharging_current: self
                .max_discharging_current
                .min(other.max_discharging_current),
            max_charging_current: self.max_charging_current.min(other.max_charging_current),
        }
    }

    /// Headroom left before the battery is full (Ah).
    pub fn room(&self) -> f64 {
        (self.max_capacity - self.state_of_charge).max(0.0)
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "V={:.1} I={:>7.3} A | SoC={:.3}/{:.3} Ah | range=[-{:.3}, {:.3}] A",
            self.voltage,
            self.current,
            self.state_of_charge,
            self.max_capacity,
            self.max_charging_current,
            self.max_discharging_current,
        )
    }
}
