use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

use super::{Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Meter};
use crate::clock::SharedClock;
use crate::directory::Lookup;
use crate::error::{BosError, Result};

/// A logical battery merging several sources into one.
///
/// Capacity, state of charge, and current are summed. Rate limits are
/// derived from the slowest source so the aggregate never promises a rate
/// it cannot sustain until empty (or full), and every `set_current` is
/// split so that all sources reach empty (or full) at the same instant.
pub struct AggregatorBattery {
    name: String,
    sources: Vec<String>,
    voltage: f64,
    voltage_tolerance: f64,
    lookup: Lookup,
    meter: Meter,
    sample_period: Duration,
}

impl AggregatorBattery {
    /// Creates an aggregator over `sources`.
    ///
    /// # Errors
    ///
    /// - `NoBattery` if `sources` is empty
    /// - `InvalidArgument` if a source is listed twice or the tolerance is negative
    /// - `BadName` if a source cannot be resolved
    /// - `VoltageMismatch` if a source's voltage differs from `voltage` by
    ///   more than `voltage_tolerance`
    pub fn new(
        name: impl Into<String>,
        sources: Vec<String>,
        voltage: f64,
        voltage_tolerance: f64,
        lookup: Lookup,
        clock: SharedClock,
    ) -> Result<Self> {
        let name = name.into();
        if sources.is_empty() {
            return Err(BosError::NoBattery);
        }
        if voltage_tolerance < 0.0 {
            return Err(BosError::InvalidArgument(
                "voltage tolerance must be non-negative".to_string(),
            ));
        }
        let unique: BTreeSet<&String> = sources.iter().collect();
        if unique.len() != sources.len() {
            return Err(BosError::InvalidArgument(format!(
                "aggregator \"{name}\" lists a source twice"
            )));
        }

        let mut soc = 0.0;
        for source in &sources {
            let status = lookup.battery(source)?.get_status()?;
            if (status.voltage - voltage).abs() > voltage_tolerance {
                return Err(BosError::VoltageMismatch {
                    name: source.clone(),
                    expected: voltage,
                    tolerance: voltage_tolerance,
                    actual: status.voltage,
                });
            }
            soc += status.state_of_charge;
        }

        Ok(Self {
            name,
            sources,
            voltage,
            voltage_tolerance,
            lookup,
            meter: Meter::new(clock, soc),
            sample_period: DEFAULT_SAMPLE_PERIOD,
        })
    }

    pub fn with_sample_period(mut self, period: Duration) -> Self {
        self.sample_period = period;
        self
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn voltage_tolerance(&self) -> f64 {
        self.voltage_tolerance
    }

    fn source_statuses(&self) -> Result<Vec<(String, BatteryStatus)>> {
        self.sources
            .iter()
            .map(|name| Ok((name.clone(), self.lookup.battery(name)?.get_status()?)))
            .collect()
    }

    fn combine(&self, statuses: &[(String, BatteryStatus)]) -> BatteryStatus {
        let mut total = BatteryStatus::empty(self.voltage);
        for (_, s) in statuses {
            total.current += s.current;
            total.state_of_charge += s.state_of_charge;
            total.max_capacity += s.max_capacity;
        }
        let room = total.max_capacity - total.state_of_charge;

        let slowest_empty = statuses
            .iter()
            .map(|(_, s)| time_to_limit(s.state_of_charge, s.max_discharging_current))
            .fold(0.0, f64::max);
        let slowest_full = statuses
            .iter()
            .map(|(_, s)| time_to_limit(s.room(), s.max_charging_current))
            .fold(0.0, f64::max);

        total.max_discharging_current = rate_over(total.state_of_charge, slowest_empty);
        total.max_charging_current = rate_over(room, slowest_full);
        total
    }
}

/// Hours to move `charge` Ah at `rate` A; infinite when the rate is zero
/// but charge remains.
fn time_to_limit(charge: f64, rate: f64) -> f64 {
    if charge <= 0.0 {
        0.0
    } else if rate <= 0.0 {
        f64::INFINITY
    } else {
        charge / rate
    }
}

fn rate_over(charge: f64, hours: f64) -> f64 {
    if hours > 0.0 && hours.is_finite() {
        charge / hours
    } else {
        0.0
    }
}

impl Battery for AggregatorBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Aggregator
    }

    fn meter(&self) -> &Meter {
        &self.meter
    }

    fn sample_period(&self) -> Duration {
        self.sample_period
    }

    fn refresh(&self) -> Result<BatteryStatus> {
        for source in &self.sources {
            self.lookup.battery(source)?.refresh()?;
        }
        self.get_status()
    }

    fn get_status(&self) -> Result<BatteryStatus> {
        let statuses = self.source_statuses()?;
        let status = self.combine(&statuses);
        self.meter.observe(status.current);
        Ok(status)
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let statuses = self.source_statuses()?;
        let total = self.combine(&statuses);
        total.check_current(target)?;

        let plan: Vec<(String, f64)> = statuses
            .iter()
            .map(|(name, s)| {
                let share = if target > 0.0 {
                    s.state_of_charge / total.state_of_charge * target
                } else if target < 0.0 {
                    s.room() / (total.max_capacity - total.state_of_charge) * target
                } else {
                    0.0
                };
                // snap floating-point noise back into the source's own range
                (
                    name.clone(),
                    share.clamp(-s.max_charging_current, s.max_discharging_current),
                )
            })
            .collect();

        debug!(battery = %self.name, target, ?plan, "aggregator plan");
        for (name, current) in &plan {
            self.lookup.battery(name)?.set_current(*current)?;
        }
        self.meter.observe(total.current);
        self.meter.update(total.current, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::battery::PseudoBattery;
    use crate::clock::DummyClock;
    use crate::directory::Node;

    fn setup(packs: &[(&str, BatteryStatus)]) -> (Lookup, HashMap<String, Arc<PseudoBattery>>, SharedClock) {
        let (_clock, shared) = DummyClock::shared(0.0);
        let map: HashMap<String, Arc<PseudoBattery>> = packs
            .iter()
            .map(|(n, s)| {
                (n.to_string(), Arc::new(PseudoBattery::new(*n, *s, shared.clone()).unwrap()))
            })
            .collect();
        let resolved = map.clone();
        let lookup = Lookup::new(move |name| {
            resolved
                .get(name)
                .map(|b| Node::Battery(b.clone() as Arc<dyn Battery>))
        });
        (lookup, map, shared)
    }

    fn pack(soc: f64, cap: f64, mdc: f64, mcc: f64) -> BatteryStatus {
        BatteryStatus::new(7000.0, 0.0, soc, cap, mdc, mcc)
    }

    #[test]
    fn empty_sources_rejected() {
        let (lookup, _, clock) = setup(&[]);
        assert!(matches!(
            AggregatorBattery::new("agg", vec![], 7000.0, 500.0, lookup, clock),
            Err(BosError::NoBattery)
        ));
    }

    #[test]
    fn voltage_outside_tolerance_rejected() {
        let mut off = pack(10.0, 10.0, 1.0, 1.0);
        off.voltage = 7600.0;
        let (lookup, _, clock) = setup(&[("a", pack(10.0, 10.0, 1.0, 1.0)), ("b", off)]);
        let err = AggregatorBattery::new("agg", vec!["a".into(), "b".into()], 7000.0, 500.0, lookup, clock);
        assert!(matches!(err, Err(BosError::VoltageMismatch { .. })));
    }

    #[test]
    fn derived_rates_follow_slowest_source() {
        // a empties in 10 h, b in 20 h
        let (lookup, _, clock) = setup(&[
            ("a", pack(100.0, 200.0, 10.0, 10.0)),
            ("b", pack(100.0, 100.0, 5.0, 5.0)),
        ]);
        let agg = AggregatorBattery::new("agg", vec!["a".into(), "b".into()], 7000.0, 1.0, lookup, clock).unwrap();
        let s = agg.get_status().unwrap();
        assert_eq!(s.max_capacity, 300.0);
        assert_eq!(s.state_of_charge, 200.0);
        assert!((s.max_discharging_current - 10.0).abs() < 1e-9);
        // only a has room: 100 Ah at 10 A
        assert!((s.max_charging_current - 10.0).abs() < 1e-9);
    }

    #[test]
    fn discharge_plan_empties_together() {
        let (lookup, packs, clock) = setup(&[
            ("a", pack(300.0, 1000.0, 12.0, 12.0)),
            ("b", pack(100.0, 1000.0, 12.0, 12.0)),
        ]);
        let agg = AggregatorBattery::new("agg", vec!["a".into(), "b".into()], 7000.0, 1.0, lookup, clock).unwrap();
        agg.set_current(4.0).unwrap();
        let a = packs["a"].get_status().unwrap();
        let b = packs["b"].get_status().unwrap();
        assert!((a.current - 3.0).abs() < 1e-9);
        assert!((b.current - 1.0).abs() < 1e-9);
        assert!((a.state_of_charge / a.current - b.state_of_charge / b.current).abs() < 1e-9);
    }

    #[test]
    fn charge_plan_fills_together() {
        let (lookup, packs, clock) = setup(&[
            ("a", pack(900.0, 1000.0, 12.0, 12.0)),
            ("b", pack(700.0, 1000.0, 12.0, 12.0)),
        ]);
        let agg = AggregatorBattery::new("agg", vec!["a".into(), "b".into()], 7000.0, 1.0, lookup, clock).unwrap();
        agg.set_current(-4.0).unwrap();
        assert!((packs["a"].get_status().unwrap().current + 1.0).abs() < 1e-9);
        assert!((packs["b"].get_status().unwrap().current + 3.0).abs() < 1e-9);
        assert!((agg.get_status().unwrap().current + 4.0).abs() < 1e-9);
    }

    #[test]
    fn rejected_target_leaves_sources_untouched() {
        let (lookup, packs, clock) = setup(&[
            ("a", pack(500.0, 1000.0, 12.0, 12.0)),
            ("b", pack(500.0, 1000.0, 12.0, 12.0)),
        ]);
        let agg = AggregatorBattery::new("agg", vec!["a".into(), "b".into()], 7000.0, 1.0, lookup, clock).unwrap();
        assert!(matches!(
            agg.set_current(24.1),
            Err(BosError::CurrentOutOfRange { .. })
        ));
        assert_eq!(packs["a"].get_status().unwrap().current, 0.0);
        assert_eq!(packs["b"].get_status().unwrap().current, 0.0);
    }
}
