//! Integration tests for proportional and tranche partitioning.

mod common;

use std::sync::Arc;

use bos::battery::BatteryStatus;
use bos::bos::Bos;
use bos::clock::DummyClock;
use bos::error::BosError;
use bos::policy::{PolicyKind, Scale, SplitPlacement};

use common::{approx, dummy_bos, pack, pack_with};

fn proportional_bos() -> (Arc<DummyClock>, Bos) {
    let (clock, bos) = dummy_bos();
    bos.make_pseudo("src", pack()).unwrap();
    bos.make_splitter_policy("split", PolicyKind::Proportional, "src", Some("p0"))
        .unwrap();
    (clock, bos)
}

fn split(bos: &Bos, name: &str, from: &str, status: BatteryStatus) {
    bos.make_splitter_battery(name, "split", status, &SplitPlacement::From(from.into()))
        .unwrap();
}

fn total_scale(bos: &Bos) -> [f64; 4] {
    let report = bos.policy_report("split").unwrap();
    let mut total = [0.0; 4];
    for part in &report.parts {
        let dims = part.scale.map(|s| s.dims()).unwrap_or_default();
        for (t, d) in total.iter_mut().zip(dims) {
            *t += d;
        }
    }
    total
}

#[test]
fn partitions_conserve_the_source() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(100.0, 200.0, 3.0));
    split(&bos, "p2", "p0", pack_with(150.0, 300.0, 3.0));

    for dim in total_scale(&bos) {
        assert!(approx(dim, 1.0), "scales should sum to 1, got {dim}");
    }

    let soc: f64 = ["p0", "p1", "p2"]
        .iter()
        .map(|n| bos.get_status(n).unwrap().state_of_charge)
        .sum();
    assert!(approx(soc, 500.0));

    let capacity: f64 = ["p0", "p1", "p2"]
        .iter()
        .map(|n| bos.get_status(n).unwrap().max_capacity)
        .sum();
    assert!(approx(capacity, 1000.0));
}

#[test]
fn partition_currents_sum_onto_the_source() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    bos.set_current("p0", 4.0).unwrap();
    bos.set_current("p1", -1.5).unwrap();
    assert!(approx(bos.get_status("src").unwrap().current, 2.5));
    assert!(approx(bos.policy_report("split").unwrap().net_current(), 2.5));
}

#[test]
fn rejected_partition_current_leaves_source_untouched() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    assert!(matches!(
        bos.set_current("p1", 7.0),
        Err(BosError::NoResources(_))
    ));
    assert!(approx(bos.get_status("src").unwrap().current, 0.0));
}

#[test]
fn split_then_free_restores_the_donor() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    bos.free_battery("p1").unwrap();

    let report = bos.policy_report("split").unwrap();
    assert_eq!(report.parts.len(), 1);
    assert_eq!(report.part("p0").and_then(|p| p.scale), Some(Scale::full()));
    let p0 = bos.get_status("p0").unwrap();
    assert!(approx(p0.state_of_charge, 500.0));
    assert!(approx(p0.max_discharging_current, 12.0));
}

#[test]
fn busy_partition_cannot_be_freed() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    bos.set_current("p1", 1.0).unwrap();
    assert!(matches!(bos.free_battery("p1"), Err(BosError::BatteryInUse(_))));
    assert!(bos.contains("p1"));

    bos.set_current("p1", 0.0).unwrap();
    bos.free_battery("p1").unwrap();
    assert!(!bos.contains("p1"));
}

#[test]
fn freeing_the_policy_removes_all_partitions() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    bos.free_battery("split").unwrap();
    for name in ["split", "p0", "p1"] {
        assert!(!bos.contains(name), "{name} should be gone");
    }
    assert!(bos.get_children("src").unwrap().is_empty());
}

fn tranche_bos() -> Bos {
    let (_clock, bos) = dummy_bos();
    bos.make_pseudo("src", pack()).unwrap();
    bos.make_splitter_policy("wf", PolicyKind::Tranche, "src", None)
        .unwrap();
    bos.make_splitter_battery(
        "first",
        "wf",
        pack_with(100.0, 200.0, 5.0),
        &SplitPlacement::Position(-1),
    )
    .unwrap();
    bos.make_splitter_battery(
        "second",
        "wf",
        pack_with(1000.0, 1000.0, 10.0),
        &SplitPlacement::Position(-1),
    )
    .unwrap();
    bos
}

#[test]
fn tranches_are_served_in_priority_order() {
    let bos = tranche_bos();
    let first = bos.get_status("first").unwrap();
    let second = bos.get_status("second").unwrap();
    assert!(approx(first.max_discharging_current, 5.0));
    assert!(approx(second.max_discharging_current, 7.0));
    assert!(approx(first.state_of_charge, 100.0));
    assert!(approx(second.state_of_charge, 400.0));
    assert!(approx(second.max_capacity, 800.0));
}

#[test]
fn tranche_bound_is_enforced() {
    let bos = tranche_bos();
    bos.set_current("second", 7.0).unwrap();
    assert!(matches!(
        bos.set_current("second", 8.0),
        Err(BosError::NoResources(_))
    ));
    bos.set_current("first", 5.0).unwrap();
    assert!(approx(bos.get_status("src").unwrap().current, 12.0));
}

#[test]
fn freed_tranche_capacity_flows_down() {
    let bos = tranche_bos();
    bos.free_battery("first").unwrap();
    let second = bos.get_status("second").unwrap();
    assert!(approx(second.max_discharging_current, 10.0));
    assert!(approx(second.state_of_charge, 500.0));
}

#[test]
fn tranche_position_out_of_range_is_invalid() {
    let bos = tranche_bos();
    assert!(matches!(
        bos.make_splitter_battery(
            "late",
            "wf",
            pack_with(1.0, 1.0, 1.0),
            &SplitPlacement::Position(5),
        ),
        Err(BosError::InvalidArgument(_))
    ));
    bos.make_splitter_battery(
        "head",
        "wf",
        pack_with(50.0, 50.0, 1.0),
        &SplitPlacement::Position(0),
    )
    .unwrap();
    let names: Vec<String> = bos
        .policy_report("wf")
        .unwrap()
        .parts
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["head", "first", "second"]);
}

#[test]
fn concurrent_partition_currents_sum_at_the_source() {
    let (_clock, bos) = proportional_bos();
    split(&bos, "p1", "p0", pack_with(250.0, 500.0, 6.0));
    let bos = Arc::new(bos);

    let workers: Vec<_> = [("p0", [1.0, -2.0, 0.5, 3.0]), ("p1", [-1.5, 2.0, 4.0, -0.5])]
        .into_iter()
        .map(|(name, steps)| {
            let bos = bos.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    bos.set_current(name, steps[i % steps.len()]).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let report = bos.policy_report("split").unwrap();
    let net: f64 = report.parts.iter().map(|p| p.current).sum();
    assert!(approx(net, 3.0 + -0.5));
    assert!(approx(bos.get_status("src").unwrap().current, net));
}
