//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bos::battery::BatteryStatus;
use bos::bos::Bos;
use bos::clock::DummyClock;

/// Tolerance for floating-point comparisons of charge and current.
pub const EPS: f64 = 1e-6;

/// Default pack: 7000 mV, idle, 500 of 1000 Ah, ±12 A.
pub fn pack() -> BatteryStatus {
    pack_with(500.0, 1000.0, 12.0)
}

/// An idle 7000 mV pack with the given charge, capacity and symmetric rate.
pub fn pack_with(soc: f64, capacity: f64, rate: f64) -> BatteryStatus {
    BatteryStatus::new(7000.0, 0.0, soc, capacity, rate, rate)
}

/// A `Bos` on a manual clock starting at t = 0 with a 1 s sample period.
pub fn dummy_bos() -> (Arc<DummyClock>, Bos) {
    let (clock, shared) = DummyClock::shared(0.0);
    (clock, Bos::with_clock(shared, Duration::from_secs(1)))
}

/// Two default packs `a` and `b` merged into aggregator `agg`.
pub fn aggregated_bos() -> (Arc<DummyClock>, Bos) {
    let (clock, bos) = dummy_bos();
    bos.make_pseudo("a", pack()).unwrap();
    bos.make_pseudo("b", pack()).unwrap();
    bos.make_aggregator("agg", &names(&["a", "b"]), 7000.0, 500.0)
        .unwrap();
    (clock, bos)
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < EPS
}
