//! Proportional partitioning.
//!
//! Every partition owns a [`Scale`] of the source. Scales only move between
//! partitions: a split subtracts from the donor, a removal adds back to the
//! merge target. Reported state of charge is reconciled from the partition
//! meters so that drift between partitions shows up where it was drawn.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::debug;

use super::{EPSILON, PartReport, PolicyKind, PolicyReport, Scale, SplitPlacement, SplitterPolicy};
use crate::battery::{Battery, BatteryStatus};
use crate::directory::Lookup;
use crate::error::{BosError, Result};

/// Largest voltage difference accepted between a new partition and its donor.
const VOLTAGE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
struct Partition {
    scale: Scale,
    current: f64,
    /// Partition this one was split from.
    donor: Option<String>,
}

/// Splits a source into partitions holding fixed fractions of it.
///
/// Scale and current live in one record per partition, so the set of
/// partitions with a scale and the set with a current are always the same.
pub struct ProportionalPolicy {
    name: String,
    source: String,
    lookup: Lookup,
    /// Held across calls into the source so the net current pushed there
    /// always equals the sum of the partition currents. Lock order is policy
    /// then source (or a partition meter); neither ever calls back into the
    /// policy, so the order cannot invert.
    parts: ReentrantMutex<RefCell<BTreeMap<String, Partition>>>,
}

impl ProportionalPolicy {
    /// Creates a policy whose first partition `init` holds the whole source.
    ///
    /// # Errors
    ///
    /// Returns `BadName` if `source` does not resolve to a battery.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        init: impl Into<String>,
        lookup: Lookup,
    ) -> Result<Self> {
        let source = source.into();
        let status = lookup.battery(&source)?.get_status()?;
        let mut parts = BTreeMap::new();
        parts.insert(
            init.into(),
            Partition {
                scale: Scale::full(),
                current: status.current,
                donor: None,
            },
        );
        Ok(Self {
            name: name.into(),
            source,
            lookup,
            parts: ReentrantMutex::new(RefCell::new(parts)),
        })
    }

    /// Scale currently held by `child`.
    pub fn scale_of(&self, child: &str) -> Result<Scale> {
        let guard = self.parts.lock();
        let parts = guard.borrow();
        parts
            .get(child)
            .map(|p| p.scale)
            .ok_or_else(|| BosError::BadName(child.to_string()))
    }

    fn source_battery(&self) -> Result<Arc<dyn Battery>> {
        self.lookup.battery(&self.source)
    }

    fn partition(&self, child: &str) -> Result<Partition> {
        let guard = self.parts.lock();
        let parts = guard.borrow();
        parts
            .get(child)
            .cloned()
            .ok_or_else(|| BosError::BadName(child.to_string()))
    }

    /// Meter of a partition's battery handle; unregistered handles count as empty.
    fn meter_of(&self, child: &str) -> f64 {
        self.lookup
            .battery(child)
            .map(|b| b.get_meter().max(0.0))
            .unwrap_or(0.0)
    }

    fn net_current(&self) -> f64 {
        let guard = self.parts.lock();
        let parts = guard.borrow();
        parts.values().map(|p| p.current).sum()
    }

    /// Sets a partition's meter to its share of the source's charge.
    fn reseed(&self, child: &str) -> Result<()> {
        let scale = self.partition(child)?.scale;
        let Ok(handle) = self.lookup.battery(child) else {
            return Ok(());
        };
        let source = self.source_battery()?.get_status()?;
        handle.set_meter(scale.state_of_charge * source.state_of_charge);
        Ok(())
    }
}

impl SplitterPolicy for ProportionalPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Proportional
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn refresh(&self) -> Result<()> {
        self.source_battery()?.refresh()?;
        Ok(())
    }

    fn get_status(&self, child: &str) -> Result<BatteryStatus> {
        let _policy = self.parts.lock();
        let part = self.partition(child)?;
        let source = self.source_battery()?.get_status()?;

        let mut status = part.scale.apply(&source);
        let total_meter: f64 = self.children().iter().map(|n| self.meter_of(n)).sum();
        status.state_of_charge = if total_meter > EPSILON {
            self.meter_of(child) / total_meter * source.state_of_charge
        } else {
            part.scale.state_of_charge * source.state_of_charge
        };
        status.state_of_charge = status.state_of_charge.clamp(0.0, status.max_capacity);
        status.current = part.current;
        Ok(status)
    }

    fn set_current(&self, child: &str, target: f64) -> Result<()> {
        let guard = self.parts.lock();
        let status = self.get_status(child)?;
        if target > status.max_discharging_current || target < -status.max_charging_current {
            return Err(BosError::NoResources(format!(
                "partition \"{child}\" is limited to [{}, {}] A",
                -status.max_charging_current, status.max_discharging_current
            )));
        }

        let old = {
            let mut parts = guard.borrow_mut();
            let part = parts
                .get_mut(child)
                .ok_or_else(|| BosError::BadName(child.to_string()))?;
            std::mem::replace(&mut part.current, target)
        };
        let net = self.net_current();
        debug!(policy = %self.name, child, target, net, "pushing net current");
        if let Err(e) = self.source_battery().and_then(|s| s.set_current(net)) {
            if let Some(part) = guard.borrow_mut().get_mut(child) {
                part.current = old;
            }
            return Err(e);
        }
        Ok(())
    }

    fn add_child(
        &self,
        child: &str,
        target: BatteryStatus,
        placement: &SplitPlacement,
    ) -> Result<BatteryStatus> {
        let SplitPlacement::From(donor) = placement else {
            return Err(BosError::InvalidArgument(
                "proportional partitions are split from an existing partition".to_string(),
            ));
        };
        target.validate()?;

        let guard = self.parts.lock();
        if guard.borrow().contains_key(child) {
            return Err(BosError::NameTaken(child.to_string()));
        }
        let donor_part = self.partition(donor)?;
        if donor_part.current != 0.0 {
            return Err(BosError::BatteryInUse(donor.clone()));
        }

        let donor_status = self.get_status(donor)?;
        if (target.voltage - donor_status.voltage).abs() > VOLTAGE_TOLERANCE {
            return Err(BosError::VoltageMismatch {
                name: child.to_string(),
                expected: donor_status.voltage,
                tolerance: VOLTAGE_TOLERANCE,
                actual: target.voltage,
            });
        }

        let mut actual = target.min_with(&donor_status);
        actual.voltage = donor_status.voltage;
        actual.current = 0.0;

        let source = self.source_battery()?.get_status()?;
        let scale = Scale::ratio(&actual, &source);
        let remaining = donor_part.scale.checked_sub(&scale)?;

        {
            let mut parts = guard.borrow_mut();
            if let Some(d) = parts.get_mut(donor.as_str()) {
                d.scale = remaining;
            }
            parts.insert(
                child.to_string(),
                Partition {
                    scale,
                    current: 0.0,
                    donor: Some(donor.clone()),
                },
            );
        }
        debug!(policy = %self.name, child, donor = %donor, %scale, "split partition");
        self.reseed(donor)?;
        Ok(actual)
    }

    fn remove_child(&self, child: &str, merge_into: Option<&str>) -> Result<()> {
        let guard = self.parts.lock();
        let part = self.partition(child)?;
        if part.current != 0.0 {
            return Err(BosError::BatteryInUse(child.to_string()));
        }

        let target = {
            let parts = guard.borrow();
            match merge_into {
                Some(name) if name != child && parts.contains_key(name) => Some(name.to_string()),
                Some(name) => return Err(BosError::BadName(name.to_string())),
                None => part
                    .donor
                    .clone()
                    .filter(|d| parts.contains_key(d))
                    .or_else(|| parts.keys().find(|k| k.as_str() != child).cloned()),
            }
        };

        if let Some(target) = &target {
            let charge = self.meter_of(child);
            if let Ok(handle) = self.lookup.battery(target) {
                handle.set_meter(handle.get_meter() + charge);
            }
        }

        let mut parts = guard.borrow_mut();
        if let Some(target) = &target {
            if let Some(t) = parts.get_mut(target) {
                t.scale = t.scale.saturating_add(&part.scale);
            }
        }
        parts.remove(child);
        for p in parts.values_mut() {
            if p.donor.as_deref() == Some(child) {
                p.donor = target.clone();
            }
        }
        debug!(policy = %self.name, child, merged_into = ?target, "removed partition");
        Ok(())
    }

    fn reset_meter(&self, child: &str) -> Result<()> {
        let _policy = self.parts.lock();
        self.reseed(child)
    }

    fn children(&self) -> Vec<String> {
        let guard = self.parts.lock();
        let parts = guard.borrow();
        parts.keys().cloned().collect()
    }

    fn report(&self) -> Result<PolicyReport> {
        let guard = self.parts.lock();
        let parts = guard.borrow();
        Ok(PolicyReport {
            name: self.name.clone(),
            kind: PolicyKind::Proportional,
            source: self.source.clone(),
            parts: parts
                .iter()
                .map(|(name, p)| PartReport {
                    name: name.clone(),
                    current: p.current,
                    scale: Some(p.scale),
                    target: None,
                })
                .collect(),
        })
    }
}
