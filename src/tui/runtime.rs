//! Monitor state: the latest snapshot, selection, and rolling history.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::bos::Bos;
use crate::telemetry::{self, StatusRow};

/// Maximum number of history samples kept for the rolling chart.
const MAX_HISTORY: usize = 200;

/// Tick interval options in milliseconds (slowest → fastest).
const SPEED_LEVELS_MS: [u64; 5] = [5000, 2000, 1000, 500, 250];

/// Default speed index (1 s).
const DEFAULT_SPEED_IDX: usize = 2;

/// One chart sample of the selected battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time_s: f64,
    pub state_of_charge: f64,
    pub meter: f64,
}

/// TUI application state.
pub struct App {
    bos: Arc<Bos>,
    /// Latest status of every battery, in name order.
    pub rows: Vec<StatusRow>,
    /// Index into `rows` of the highlighted battery.
    pub selected: usize,
    /// Rolling SOC and meter history of the highlighted battery.
    pub history: VecDeque<Sample>,
    pub paused: bool,
    /// Current index into `SPEED_LEVELS_MS`.
    pub speed_idx: usize,
    pub quit: bool,
    /// When the last snapshot was taken.
    pub last_tick: Instant,
    /// Number of snapshots taken so far.
    pub ticks: u64,
}

impl App {
    /// Creates the monitor and takes the first snapshot.
    pub fn new(bos: Arc<Bos>) -> Self {
        let mut app = Self {
            bos,
            rows: Vec::new(),
            selected: 0,
            history: VecDeque::with_capacity(MAX_HISTORY),
            paused: false,
            speed_idx: DEFAULT_SPEED_IDX,
            quit: false,
            last_tick: Instant::now(),
            ticks: 0,
        };
        app.tick();
        app
    }

    /// Takes a fresh snapshot and records a sample of the selection.
    pub fn tick(&mut self) {
        self.rows = telemetry::snapshot(&self.bos);
        if self.selected >= self.rows.len() {
            self.selected = self.rows.len().saturating_sub(1);
        }
        if let Some(row) = self.rows.get(self.selected) {
            if self.history.len() >= MAX_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(Sample {
                time_s: row.time_s,
                state_of_charge: row.state_of_charge,
                meter: row.meter,
            });
        }
        self.ticks += 1;
    }

    /// Forces a status read through every battery, then snapshots.
    pub fn refresh_all(&mut self) {
        for row in &self.rows {
            if let Err(e) = self.bos.refresh(&row.name) {
                warn!(battery = %row.name, error = %e, "refresh failed");
            }
        }
        self.tick();
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Shortens the snapshot interval.
    pub fn speed_up(&mut self) {
        if self.speed_idx + 1 < SPEED_LEVELS_MS.len() {
            self.speed_idx += 1;
        }
    }

    /// Lengthens the snapshot interval.
    pub fn speed_down(&mut self) {
        if self.speed_idx > 0 {
            self.speed_idx -= 1;
        }
    }

    pub fn tick_interval_ms(&self) -> u64 {
        SPEED_LEVELS_MS[self.speed_idx]
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
            self.history.clear();
        }
    }

    pub fn select_prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.history.clear();
        }
    }

    pub fn selected_row(&self) -> Option<&StatusRow> {
        self.rows.get(self.selected)
    }

    /// Fraction of capacity held by the selection (0 when capacity is 0).
    pub fn selected_fill(&self) -> f64 {
        self.selected_row()
            .filter(|r| r.max_capacity > 0.0)
            .map_or(0.0, |r| r.state_of_charge / r.max_capacity)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::battery::BatteryStatus;
    use crate::clock::DummyClock;

    fn make_app() -> (Arc<DummyClock>, App) {
        let (clock, shared) = DummyClock::shared(0.0);
        let bos = Bos::with_clock(shared, Duration::from_secs(1));
        bos.make_pseudo("a", BatteryStatus::new(7000.0, 0.0, 500.0, 1000.0, 12.0, 12.0))
            .unwrap();
        bos.make_pseudo("b", BatteryStatus::new(7000.0, 0.0, 100.0, 1000.0, 12.0, 12.0))
            .unwrap();
        (clock, App::new(Arc::new(bos)))
    }

    #[test]
    fn first_snapshot_is_taken_on_creation() {
        let (_clock, app) = make_app();
        assert_eq!(app.rows.len(), 2);
        assert_eq!(app.history.len(), 1);
        assert!((app.selected_fill() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn selection_stays_in_bounds_and_resets_history() {
        let (_clock, mut app) = make_app();
        app.select_prev();
        assert_eq!(app.selected, 0);
        app.select_next();
        app.select_next();
        assert_eq!(app.selected, 1);
        assert!(app.history.is_empty());
        app.tick();
        assert_eq!(app.selected_row().map(|r| r.name.as_str()), Some("b"));
    }

    #[test]
    fn history_tracks_discharge() {
        let (clock, mut app) = make_app();
        app.bos.set_current("a", 10.0).unwrap();
        clock.tick(360.0).unwrap();
        app.refresh_all();
        let last = app.history.back().copied().unwrap();
        assert_eq!(last.time_s, 360.0);
        assert!((last.meter - 499.0).abs() < 1e-9);
    }

    #[test]
    fn speed_controls_stay_in_bounds() {
        let (_clock, mut app) = make_app();
        for _ in 0..10 {
            app.speed_down();
        }
        assert_eq!(app.speed_idx, 0);
        for _ in 0..10 {
            app.speed_up();
        }
        assert_eq!(app.speed_idx, SPEED_LEVELS_MS.len() - 1);
    }

    #[test]
    fn history_caps_at_max() {
        let (_clock, mut app) = make_app();
        for _ in 0..MAX_HISTORY + 10 {
            app.tick();
        }
        assert_eq!(app.history.len(), MAX_HISTORY);
    }
}
