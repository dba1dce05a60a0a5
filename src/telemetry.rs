//! Status snapshots of every battery and their CSV export.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::bos::Bos;
use crate::directory::NodeKind;
use crate::error::Result;

/// Column header for CSV status export.
pub const HEADER: &str = "time_s,name,kind,voltage,current,state_of_charge,max_capacity,\
                          max_discharging_current,max_charging_current,meter,credit";

/// One battery's status, meter and credit at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    pub time_s: f64,
    pub name: String,
    pub kind: String,
    pub voltage: f64,
    pub current: f64,
    pub state_of_charge: f64,
    pub max_capacity: f64,
    pub max_discharging_current: f64,
    pub max_charging_current: f64,
    pub meter: f64,
    pub credit: f64,
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>10.1}s {:<16} {:<10} V={:>8.1} I={:>8.3} SOC={:>9.3}/{:<9.3} \
             meter={:>9.3} credit={:>+8.3}",
            self.time_s,
            self.name,
            self.kind,
            self.voltage,
            self.current,
            self.state_of_charge,
            self.max_capacity,
            self.meter,
            self.credit,
        )
    }
}

/// Reads one battery's status together with its meter.
///
/// # Errors
///
/// Returns `BadName` if `name` is not a battery, or whatever error the
/// battery's status read produces.
pub fn status_row(bos: &Bos, name: &str) -> Result<StatusRow> {
    let battery = bos.battery(name)?;
    let status = battery.get_status()?;
    let meter = battery.get_meter();
    Ok(StatusRow {
        time_s: bos.clock().now(),
        name: name.to_string(),
        kind: battery.kind().to_string(),
        voltage: status.voltage,
        current: status.current,
        state_of_charge: status.state_of_charge,
        max_capacity: status.max_capacity,
        max_discharging_current: status.max_discharging_current,
        max_charging_current: status.max_charging_current,
        meter,
        credit: status.state_of_charge - meter,
    })
}

/// Reads every battery in `bos`, in name order.
///
/// Policies are skipped. A battery whose status cannot be read is logged
/// and left out of the snapshot.
pub fn snapshot(bos: &Bos) -> Vec<StatusRow> {
    bos.list()
        .into_iter()
        .filter(|info| matches!(info.kind, NodeKind::Battery(_)))
        .filter_map(|info| match status_row(bos, &info.name) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(battery = %info.name, error = %e, "status unavailable");
                None
            }
        })
        .collect()
}

/// Exports status rows to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(rows: &[StatusRow], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(rows, buf)
}

/// Writes status rows as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(rows: &[StatusRow], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in rows {
        wtr.write_record(&[
            format!("{:.3}", r.time_s),
            r.name.clone(),
            r.kind.clone(),
            format!("{:.3}", r.voltage),
            format!("{:.4}", r.current),
            format!("{:.4}", r.state_of_charge),
            format!("{:.4}", r.max_capacity),
            format!("{:.4}", r.max_discharging_current),
            format!("{:.4}", r.max_charging_current),
            format!("{:.4}", r.meter),
            format!("{:.4}", r.credit),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::battery::BatteryStatus;
    use crate::clock::DummyClock;
    use crate::policy::PolicyKind;

    fn demo_bos() -> Bos {
        let (_clock, shared) = DummyClock::shared(10.0);
        let bos = Bos::with_clock(shared, Duration::from_secs(1));
        bos.make_pseudo("a", BatteryStatus::new(7000.0, 0.0, 500.0, 1000.0, 12.0, 12.0))
            .unwrap();
        bos.make_splitter_policy("p", PolicyKind::Proportional, "a", Some("a0"))
            .unwrap();
        bos.make_null("spare", 7000.0).unwrap();
        bos
    }

    #[test]
    fn snapshot_skips_policies() {
        let rows = snapshot(&demo_bos());
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a0", "spare"]);
        assert_eq!(rows[1].kind, "splitter");
        assert_eq!(rows[0].time_s, 10.0);
        assert!(rows[0].credit.abs() < 1e-9);
    }

    #[test]
    fn csv_has_header_and_one_row_per_battery() {
        let rows = snapshot(&demo_bos());
        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap_or_default();
        assert!(header.starts_with("time_s,name,kind"));
        assert_eq!(header.split(',').count(), 11);
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn status_row_rejects_policies() {
        let bos = demo_bos();
        assert!(status_row(&bos, "p").is_err());
        let row = status_row(&bos, "spare").unwrap();
        assert_eq!(row.kind, "null");
        assert_eq!(row.state_of_charge, 0.0);
        assert!(row.to_string().contains("spare"));
    }

    #[test]
    fn csv_is_deterministic() {
        let rows = snapshot(&demo_bos());
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_csv(&rows, &mut a).unwrap();
        write_csv(&rows, &mut b).unwrap();
        assert_eq!(a, b);
    }
}
