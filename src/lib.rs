//! Battery virtualization engine.
//!
//! Physical packs are merged, partitioned, and proxied into a graph of
//! logical batteries owned by a single [`bos::Bos`] directory.

#[cfg(feature = "api")]
pub mod api;
pub mod battery;
pub mod bos;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod net;
pub mod policy;
pub mod telemetry;
#[cfg(feature = "tui")]
pub mod tui;
