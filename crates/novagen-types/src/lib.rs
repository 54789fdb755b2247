//! Shared records and wire types for the NovaGen job orchestration core.
//!
//! Everything here is plain data: GPU records, job snapshots, progress
//! events and the logging macros every other crate uses.

pub mod gpu;
pub mod job;
pub mod logging;
pub mod progress;

pub use gpu::*;
pub use job::*;
pub use progress::*;

// Re-exported so the `sys_*` macros resolve `log` from the caller's crate.
#[doc(hidden)]
pub use log;

/// Round to two decimal places, the precision used on the wire.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serde helper that writes an `f64` rounded to two decimals.
pub fn serialize_rounded<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(round2(*value))
}
