//! Integration tests for the directory, node lifecycle, and metering.

mod common;

use std::thread;
use std::time::Duration;

use bos::battery::driver::SimulatedDriver;
use bos::directory::NodeKind;
use bos::error::BosError;
use bos::policy::PolicyKind;

use common::{aggregated_bos, approx, dummy_bos, names, pack};

#[test]
fn listing_reports_kinds_and_parents() {
    let (_clock, bos) = aggregated_bos();
    bos.make_splitter_policy("split", PolicyKind::Tranche, "agg", Some("all"))
        .unwrap();

    let list = bos.list();
    let names: Vec<&str> = list.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["a", "agg", "all", "b", "split"]);

    let agg = list.iter().find(|i| i.name == "agg").unwrap();
    assert_eq!(agg.parents, vec!["a".to_string(), "b".to_string()]);
    let split = list.iter().find(|i| i.name == "split").unwrap();
    assert_eq!(split.kind, NodeKind::Policy(PolicyKind::Tranche));

    assert_eq!(bos.get_children("agg").unwrap(), vec!["split".to_string()]);
    assert_eq!(bos.get_parents("all").unwrap(), vec!["split".to_string()]);
    assert!(matches!(bos.get_parents("ghost"), Err(BosError::BadName(_))));
}

#[test]
fn nested_subtree_cannot_be_torn_down() {
    let (_clock, bos) = aggregated_bos();
    bos.make_splitter_policy("split", PolicyKind::Proportional, "agg", Some("p0"))
        .unwrap();
    // a -> agg -> split -> p0: agg has a child with children of its own
    assert!(matches!(bos.free_battery("a"), Err(BosError::BatteryInUse(_))));
    assert!(bos.contains("a") && bos.contains("agg") && bos.contains("p0"));
}

#[test]
fn freed_names_can_be_reused() {
    let (_clock, bos) = dummy_bos();
    bos.make_null("n", 7000.0).unwrap();
    assert!(matches!(bos.make_null("n", 7000.0), Err(BosError::NameTaken(_))));
    bos.free_battery("n").unwrap();
    bos.make_pseudo("n", pack()).unwrap();
    assert!(matches!(bos.free_battery("ghost"), Err(BosError::BadName(_))));
}

#[test]
fn current_boundaries_are_inclusive() {
    let (_clock, bos) = dummy_bos();
    bos.make_pseudo("a", pack()).unwrap();
    bos.set_current("a", 12.0).unwrap();
    bos.set_current("a", -12.0).unwrap();
    match bos.set_current("a", 12.000_001) {
        Err(BosError::CurrentOutOfRange { min, max, .. }) => {
            assert_eq!(min, -12.0);
            assert_eq!(max, 12.0);
        }
        other => panic!("expected CurrentOutOfRange, got {other:?}"),
    }
    bos.make_null("n", 7000.0).unwrap();
    assert!(bos.set_current("n", 0.0).is_ok());
    assert!(bos.set_current("n", 0.1).is_err());
}

#[test]
fn repeated_reads_do_not_move_the_meter() {
    let (clock, bos) = dummy_bos();
    bos.make_pseudo("a", pack()).unwrap();
    bos.set_current("a", 6.0).unwrap();
    clock.tick(600.0).unwrap();
    bos.get_status("a").unwrap();
    let once = bos.get_meter("a").unwrap();
    bos.get_status("a").unwrap();
    bos.refresh("a").unwrap();
    assert!(approx(bos.get_meter("a").unwrap(), once));
    assert!(approx(once, 499.0));
}

#[test]
fn meter_integrates_piecewise_current() {
    let (clock, bos) = dummy_bos();
    bos.make_pseudo("a", pack()).unwrap();
    bos.set_current("a", 12.0).unwrap();
    clock.tick(1800.0).unwrap();
    bos.set_current("a", -6.0).unwrap();
    clock.tick(3600.0).unwrap();
    bos.refresh("a").unwrap();
    // -6 Ah then +6 Ah
    assert!(approx(bos.get_meter("a").unwrap(), 500.0));

    bos.reset_meter("a").unwrap();
    assert!(approx(bos.credit("a").unwrap(), 0.0));
}

#[test]
fn background_refresh_runs_once_per_battery() {
    let (clock, bos) = dummy_bos();
    let driver = SimulatedDriver::new(pack(), bos.clock().clone(), 0.0, 7);
    bos.make_battery("cell", Box::new(driver), 3).unwrap();

    bos.start_background_refresh("cell").unwrap();
    assert!(bos.is_refreshing("cell"));
    assert!(matches!(
        bos.start_background_refresh("cell"),
        Err(BosError::InvalidArgument(_))
    ));

    bos.set_current("cell", 12.0).unwrap();
    clock.tick(3600.0).unwrap();
    // get_meter never reads the battery, so only the refresher can move it
    let mut meter = bos.get_meter("cell").unwrap();
    for _ in 0..50 {
        if approx(meter, 488.0) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
        meter = bos.get_meter("cell").unwrap();
    }
    assert!(approx(meter, 488.0), "meter should reach 488, got {meter}");

    bos.stop_background_refresh("cell").unwrap();
    assert!(!bos.is_refreshing("cell"));
    assert!(bos.stop_background_refresh("cell").is_err());
}

#[test]
fn freeing_stops_background_refresh() {
    let (_clock, bos) = dummy_bos();
    bos.make_pseudo("a", pack()).unwrap();
    bos.start_background_refresh("a").unwrap();
    bos.free_battery("a").unwrap();
    assert!(!bos.is_refreshing("a"));
    assert!(matches!(
        bos.make_aggregator("agg", &names(&["a"]), 7000.0, 1.0),
        Err(BosError::BadName(_))
    ));
}
