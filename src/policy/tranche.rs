//! Priority waterfall partitioning.
//!
//! Tranches are served in order. Each one receives the smaller of what is
//! left and what it asked for, on every dimension, and passes the rest on.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::debug;

use super::{PartReport, PolicyKind, PolicyReport, SplitPlacement, SplitterPolicy};
use crate::battery::{Battery, BatteryStatus};
use crate::directory::Lookup;
use crate::error::{BosError, Result};

#[derive(Debug, Clone)]
struct Tranche {
    name: String,
    target: BatteryStatus,
    current: f64,
}

/// Strict priority allocator over one source.
pub struct TranchePolicy {
    name: String,
    source: String,
    lookup: Lookup,
    /// Held across calls into the source so the net current pushed there
    /// always equals the sum of the partition currents. Lock order is policy
    /// then source (or a partition meter); neither ever calls back into the
    /// policy, so the order cannot invert.
    tranches: ReentrantMutex<RefCell<Vec<Tranche>>>,
}

/// Allocates `source` across `tranches` in order.
fn waterfall(source: &BatteryStatus, tranches: &[Tranche]) -> Vec<BatteryStatus> {
    let mut left = *source;
    tranches
        .iter()
        .map(|t| {
            let mut slice = t.target.min_with(&left);
            slice.state_of_charge = slice.state_of_charge.min(slice.max_capacity);
            slice.voltage = source.voltage;
            slice.current = t.current;
            for (rest, taken) in [
                (&mut left.state_of_charge, slice.state_of_charge),
                (&mut left.max_capacity, slice.max_capacity),
                (&mut left.max_discharging_current, slice.max_discharging_current),
                (&mut left.max_charging_current, slice.max_charging_current),
            ] {
                *rest = (*rest - taken).max(0.0);
            }
            slice
        })
        .collect()
}

impl TranchePolicy {
    /// Creates an empty waterfall over `source`.
    ///
    /// # Errors
    ///
    /// Returns `BadName` if `source` does not resolve to a battery.
    pub fn new(name: impl Into<String>, source: impl Into<String>, lookup: Lookup) -> Result<Self> {
        let source = source.into();
        lookup.battery(&source)?;
        Ok(Self {
            name: name.into(),
            source,
            lookup,
            tranches: ReentrantMutex::new(RefCell::new(Vec::new())),
        })
    }

    fn source_battery(&self) -> Result<Arc<dyn Battery>> {
        self.lookup.battery(&self.source)
    }

    fn position(&self, child: &str) -> Result<usize> {
        let guard = self.tranches.lock();
        let tranches = guard.borrow();
        tranches
            .iter()
            .position(|t| t.name == child)
            .ok_or_else(|| BosError::BadName(child.to_string()))
    }
}

impl SplitterPolicy for TranchePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Tranche
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn refresh(&self) -> Result<()> {
        self.source_battery()?.refresh()?;
        Ok(())
    }

    fn get_status(&self, child: &str) -> Result<BatteryStatus> {
        let guard = self.tranches.lock();
        let index = self.position(child)?;
        let source = self.source_battery()?.get_status()?;
        let slices = waterfall(&source, &guard.borrow());
        Ok(slices[index])
    }

    fn set_current(&self, child: &str, target: f64) -> Result<()> {
        let guard = self.tranches.lock();
        let slice = self.get_status(child)?;
        if !slice.accepts(target) {
            return Err(BosError::NoResources(format!(
                "tranche \"{child}\" is limited to [{}, {}] A",
                -slice.max_charging_current, slice.max_discharging_current
            )));
        }

        let index = self.position(child)?;
        let (old, net) = {
            let mut tranches = guard.borrow_mut();
            let old = std::mem::replace(&mut tranches[index].current, target);
            (old, tranches.iter().map(|t| t.current).sum::<f64>())
        };
        debug!(policy = %self.name, child, target, net, "pushing net current");
        if let Err(e) = self.source_battery().and_then(|s| s.set_current(net)) {
            guard.borrow_mut()[index].current = old;
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
        let SplitPlacement::Position(pos) = *placement else {
            return Err(BosError::InvalidArgument(
                "tranches are placed by position".to_string(),
            ));
        };
        target.validate()?;

        let guard = self.tranches.lock();
        {
            let mut tranches = guard.borrow_mut();
            if tranches.iter().any(|t| t.name == child) {
                return Err(BosError::NameTaken(child.to_string()));
            }
            let len = tranches.len();
            let index = match pos {
                -1 => len,
                p if p >= 0 && (p as usize) <= len => p as usize,
                p => {
                    return Err(BosError::InvalidArgument(format!(
                        "tranche position {p} outside [-1, {len}]"
                    )));
                }
            };
            tranches.insert(
                index,
                Tranche {
                    name: child.to_string(),
                    target,
                    current: 0.0,
                },
            );
        }
        debug!(policy = %self.name, child, pos, "added tranche");
        self.get_status(child)
    }

    fn remove_child(&self, child: &str, _merge_into: Option<&str>) -> Result<()> {
        let guard = self.tranches.lock();
        self.set_current(child, 0.0)?;
        let index = self.position(child)?;
        guard.borrow_mut().remove(index);
        debug!(policy = %self.name, child, "removed tranche");
        Ok(())
    }

    fn reset_meter(&self, child: &str) -> Result<()> {
        let _policy = self.tranches.lock();
        let slice = self.get_status(child)?;
        if let Ok(handle) = self.lookup.battery(child) {
            handle.set_meter(slice.state_of_charge);
        }
        Ok(())
    }

    fn children(&self) -> Vec<String> {
        let guard = self.tranches.lock();
        let tranches = guard.borrow();
        tranches.iter().map(|t| t.name.clone()).collect()
    }

    fn report(&self) -> Result<PolicyReport> {
        let guard = self.tranches.lock();
        let tranches = guard.borrow();
        Ok(PolicyReport {
            name: self.name.clone(),
            kind: PolicyKind::Tranche,
            source: self.source.clone(),
            parts: tranches
                .iter()
                .map(|t| PartReport {
                    name: t.name.clone(),
                    current: t.current,
                    scale: None,
                    target: Some(t.target),
                })
                .collect(),
        })
    }
}
