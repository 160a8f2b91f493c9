//! # Flowguard Telemetry
//!
//! Subscriber setup, structured security-event records and the prometheus
//! counters of a pipeline process.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::{MetricsRecorder, VerdictKind};
