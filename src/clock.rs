//! Pluggable time sources used by every meter computation.
//!
//! Nodes receive a [`SharedClock`] at construction. Production code uses
//! [`SystemClock`]; tests inject a [`DummyClock`] and advance it by hand.
//!
//! # Examples
//!
//! ```
//! use bos::clock::{Clock, DummyClock};
//!
//! let clock = DummyClock::new(0.0);
//! clock.tick(3600.0).unwrap();
//! assert_eq!(clock.now(), 3600.0);
//! ```

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{BosError, Result};

/// Seconds per hour, used to convert clock deltas into Ah integrals.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// A monotonic-enough source of wall-clock seconds.
pub trait Clock: Send + Sync {
    /// Returns the current time in seconds.
    fn now(&self) -> f64;
}

/// Clock handle shared between the orchestrator and every node.
pub type SharedClock = Arc<dyn Clock>;

/// Real time, measured from the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Returns a shared handle to the system clock.
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct DummyClock {
    time: Mutex<f64>,
}

impl DummyClock {
    /// Creates a clock frozen at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            time: Mutex::new(start),
        }
    }

    /// Creates a clock and returns it both as a concrete handle (for
    /// advancing) and as a [`SharedClock`] (for injecting).
    pub fn shared(start: f64) -> (Arc<Self>, SharedClock) {
        let clock = Arc::new(Self::new(start));
        let shared: SharedClock = clock.clone();
        (clock, shared)
    }

    /// Jumps to an absolute time.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `time` is earlier than the current time.
    pub fn set_time(&self, time: f64) -> Result<()> {
        let mut now = self.time.lock();
        if time < *now {
            return Err(BosError::InvalidArgument(format!(
                "clock cannot move backwards from {} to {time}",
                *now
            )));
        }
        *now = time;
        Ok(())
    }

    /// Advances the clock by `seconds`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a negative duration.
    pub fn tick(&self, seconds: f64) -> Result<()> {
        if seconds < 0.0 {
            return Err(BosError::InvalidArgument(format!(
                "negative clock tick {seconds}"
            )));
        }
        *self.time.lock() += seconds;
        Ok(())
    }
}

impl Clock for DummyClock {
    fn now(&self) -> f64 {
        *self.time.lock()
    }
}
