//! Integration tests for aggregating several packs into one battery.

mod common;

use bos::error::BosError;

use common::{aggregated_bos, approx, pack_with};

#[test]
fn aggregate_status_combines_sources() {
    let (_clock, bos) = aggregated_bos();
    let agg = bos.get_status("agg").unwrap();
    assert!(approx(agg.state_of_charge, 1000.0));
    assert!(approx(agg.max_capacity, 2000.0));
    assert!(approx(agg.max_discharging_current, 24.0));
    assert!(approx(agg.max_charging_current, 24.0));
    assert!(approx(agg.voltage, 7000.0));
}

#[test]
fn current_is_shared_by_state_of_charge() {
    let (_clock, bos) = aggregated_bos();
    bos.set_current("agg", 12.0).unwrap();
    assert!(approx(bos.get_status("a").unwrap().current, 6.0));
    assert!(approx(bos.get_status("b").unwrap().current, 6.0));
    assert!(approx(bos.get_status("agg").unwrap().current, 12.0));
}

#[test]
fn uneven_sources_empty_at_the_same_time() {
    let (_clock, bos) = common::dummy_bos();
    bos.make_pseudo("small", pack_with(300.0, 1000.0, 12.0)).unwrap();
    bos.make_pseudo("large", pack_with(600.0, 1000.0, 12.0)).unwrap();
    bos.make_aggregator("agg", &common::names(&["small", "large"]), 7000.0, 0.0)
        .unwrap();
    assert!(approx(bos.get_status("agg").unwrap().max_discharging_current, 18.0));

    bos.set_current("agg", 9.0).unwrap();
    let small = bos.get_status("small").unwrap();
    let large = bos.get_status("large").unwrap();
    let hours = |s: bos::battery::BatteryStatus| s.state_of_charge / s.current;
    assert!(approx(hours(small), hours(large)));
    assert!(approx(small.current + large.current, 9.0));
}

#[test]
fn aggregate_rejects_out_of_range_current() {
    let (_clock, bos) = aggregated_bos();
    assert!(matches!(
        bos.set_current("agg", 30.0),
        Err(BosError::CurrentOutOfRange { .. })
    ));
    assert!(approx(bos.get_status("a").unwrap().current, 0.0));
}

#[test]
fn meter_integrates_aggregate_current() {
    let (clock, bos) = aggregated_bos();
    bos.set_current("agg", 10.0).unwrap();
    clock.tick(1800.0).unwrap();
    bos.refresh("agg").unwrap();
    assert!(approx(bos.get_meter("agg").unwrap(), 995.0));
    // the pseudo sources never move, so the shortfall shows up as credit
    assert!(approx(bos.credit("agg").unwrap(), 5.0));
}

#[test]
fn sources_are_locked_while_aggregated() {
    let (_clock, bos) = aggregated_bos();
    assert!(matches!(
        bos.make_aggregator("again", &common::names(&["a"]), 7000.0, 1.0),
        Err(BosError::BatteryInUse(_))
    ));

    bos.free_battery("agg").unwrap();
    assert!(!bos.contains("agg"));
    bos.make_aggregator("again", &common::names(&["a"]), 7000.0, 1.0)
        .unwrap();
}

#[test]
fn freeing_a_source_tears_down_the_aggregate() {
    let (_clock, bos) = aggregated_bos();
    bos.free_battery("a").unwrap();
    assert!(!bos.contains("a"));
    assert!(!bos.contains("agg"));
    assert!(bos.get_children("b").unwrap().is_empty());
}

#[test]
fn voltage_outside_tolerance_is_refused() {
    let (_clock, bos) = common::dummy_bos();
    let mut low = pack_with(100.0, 200.0, 5.0);
    low.voltage = 3700.0;
    bos.make_pseudo("low", low).unwrap();
    assert!(matches!(
        bos.make_aggregator("agg", &common::names(&["low"]), 7000.0, 500.0),
        Err(BosError::VoltageMismatch { .. })
    ));
    assert!(!bos.contains("agg"));
}
