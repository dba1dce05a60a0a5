//! Error taxonomy shared by every battery, policy, and directory operation.

use std::io;

use thiserror::Error;

/// Errors returned by the virtualization core.
///
/// Every variant is recoverable and surfaced to the caller; nothing in the
/// core treats one of these as process-fatal.
#[derive(Debug, Error)]
pub enum BosError {
    /// A node with this name already exists in the directory.
    #[error("name \"{0}\" is already taken")]
    NameTaken(String),

    /// No node with this name exists (or it is not of the expected kind).
    #[error("bad name \"{0}\"")]
    BadName(String),

    /// A source reports a voltage outside the declared tolerance.
    #[error("voltage mismatch on \"{name}\": expected {expected} ± {tolerance}, got {actual}")]
    VoltageMismatch {
        name: String,
        expected: f64,
        tolerance: f64,
        actual: f64,
    },

    /// A composite was declared without any source.
    #[error("no source battery given")]
    NoBattery,

    /// Structural mutation on a node with active children or nonzero current.
    #[error("battery \"{0}\" is in use")]
    BatteryInUse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested current lies outside `[-max_charging, max_discharging]`.
    #[error("current {requested} out of range [{min}, {max}]")]
    CurrentOutOfRange { requested: f64, min: f64, max: f64 },

    /// A scale or rate bound would be exceeded.
    #[error("insufficient resources: {0}")]
    NoResources(String),

    /// Physical transport failure after the retry budget was spent.
    #[error("driver error: {0}")]
    DriverError(String),

    /// The peer node reported an application error.
    #[error("server error: {0}")]
    ServerError(String),

    /// The peer node answered with a malformed or incomplete response.
    #[error("bad response: {0}")]
    BadResponse(String),

    /// Socket failure underneath the node protocol.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BosError>;

impl BosError {
    /// Builds a `CurrentOutOfRange` for the closed interval `[min, max]`.
    pub fn out_of_range(requested: f64, min: f64, max: f64) -> Self {
        Self::CurrentOutOfRange { requested, min, max }
    }
}
