//! # flowguard-engine
//!
//! The capture/flow pipeline. A run opens a packet source on a blocking
//! thread, turns packets into flows, archives every flow to the CSV sink,
//! forwards it to the inference worker and reacts to the verdicts the worker
//! publishes.
//!
//! ### Key Submodules:
//! - `pipeline`: run state machine, flow dispatch, start/stop/wait
//! - `alert`: the alert latch and verdict handling
//! - `sink`: single-writer daily CSV files

mod alert;
mod error;
mod pipeline;
mod sink;

pub use alert::{AlertLatch, AlertPresenter, ThreatAlert, VerdictAction, VerdictHandler};
pub use error::EngineError;
pub use pipeline::{GeneratorFactory, Pipeline, RunStatus};
pub use sink::CsvSink;
