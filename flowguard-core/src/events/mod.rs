//! ## flowguard-core::events
//! **Progress events and run states of a capture run**
//!
//! A run moves `Idle → Listening → (Stopping) → Stopped`; `Stopped` is
//! terminal. Every run ends with exactly one [`PipelineEvent::Finished`].

use std::fmt;

use crate::flow::FlowRecord;
use crate::verdict::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Listening,
    Stopping,
    Stopped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        self == RunState::Stopped
    }
}

/// How a capture run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source closed on its own.
    Finished,
    /// The source failed while listening.
    Error(String),
    /// The run was stopped by its owner.
    Stopped,
    /// The source could not be opened; carries the inline reason.
    OpenFailed(String),
}

impl RunOutcome {
    /// The status line shown to the user when the run ends.
    pub fn status_line(&self, interface: &str) -> String {
        match self {
            RunOutcome::Finished => format!("listening: {interface} finished"),
            RunOutcome::Error(_) => format!("listening: {interface} error"),
            RunOutcome::Stopped => format!("stop listening: {interface}"),
            RunOutcome::OpenFailed(reason) => reason.clone(),
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => f.write_str("finished"),
            RunOutcome::Error(e) => write!(f, "error: {e}"),
            RunOutcome::Stopped => f.write_str("stopped"),
            RunOutcome::OpenFailed(reason) => write!(f, "open failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Human-readable progress text.
    Status(String),
    /// A flow was produced and handed to the sink and the worker.
    Flow(FlowRecord),
    /// A verdict arrived from the worker.
    Verdict(Verdict),
    /// Terminal event of a run.
    Finished {
        interface: String,
        outcome: RunOutcome,
    },
}
