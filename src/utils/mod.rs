//! Shared utilities.

pub mod telemetry;

pub use telemetry::{init_telemetry, TelemetryGuard};
