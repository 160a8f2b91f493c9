//! # flowguard-core
//!
//! Shared domain types for the capture-to-verdict pipeline.
//!
//! ### Key Submodules:
//! - `flow`: `FlowRecord`, the `FlowGenerator` contract and a basic
//!   bidirectional generator, plus the wire line formats
//! - `verdict`: classification labels returned by the inference worker
//! - `events`: progress events and run states published by a pipeline run

pub mod error;
pub mod events;
pub mod flow;
pub mod verdict;

pub mod prelude {
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::flow::*;
    pub use crate::verdict::*;
}

pub use error::FlowError;
pub use flow::{BasicFlowGenerator, FlowGenerator, FlowRecord, LineFormat};
pub use verdict::Verdict;
