//! External inference worker configuration.
//!
//! Three groups: how the process is launched, the line protocol spoken over
//! its stdin/stdout, and the bounded waits of the shutdown sequence.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WorkerConfig {
    #[validate(nested)]
    pub process: ProcessConfig,

    #[validate(nested)]
    pub protocol: ProtocolConfig,

    #[validate(nested)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProcessConfig {
    /// Virtual environment holding the interpreter.
    pub venv: PathBuf,

    /// Explicit interpreter; overrides the venv lookup.
    pub executable: Option<PathBuf>,

    /// Interpreter arguments placed before the script.
    pub args: Vec<String>,

    pub script: PathBuf,

    /// Verdict subscription buffer; slow subscribers beyond this lag.
    #[validate(range(min = 1, max = 1048576))]
    pub channel_capacity: usize,
}

impl ProcessConfig {
    /// `<venv>/Scripts/python.exe` on Windows, `<venv>/bin/python` elsewhere.
    pub fn resolve_executable(&self) -> PathBuf {
        if let Some(exe) = &self.executable {
            return exe.clone();
        }
        if cfg!(windows) {
            self.venv.join("Scripts").join("python.exe")
        } else {
            self.venv.join("bin").join("python")
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            venv: PathBuf::from(".venv"),
            executable: None,
            args: vec!["-u".into()],
            script: PathBuf::from("models/main.py"),
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Written on shutdown so the worker can exit on its own.
    #[validate(custom(function = validation::validate_marker))]
    pub terminate_token: String,

    /// Stdout lines starting with this are diagnostics.
    #[validate(custom(function = validation::validate_marker))]
    pub info_marker: String,

    /// Optional prefix stripped from result lines.
    pub result_marker: String,

    #[validate(custom(function = validation::validate_marker))]
    pub field_delimiter: String,

    /// `json` or `csv`.
    #[validate(custom(function = validation::validate_line_format))]
    pub line_format: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            terminate_token: "__TERMINATE__".into(),
            info_marker: "[INFO]".into(),
            result_marker: "[RESULT]".into(),
            field_delimiter: ";".into(),
            line_format: "json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Wait for a natural exit after stdin closes.
    #[validate(range(min = 1))]
    pub exit_timeout_ms: u64,

    /// Wait after a forced kill.
    #[validate(range(min = 1))]
    pub kill_timeout_ms: u64,

    /// Wait for the reader tasks to drain before aborting them.
    #[validate(range(min = 1))]
    pub drain_timeout_ms: u64,

    /// How long a finished capture run keeps listening for the verdicts of
    /// flows it already forwarded.
    #[validate(range(min = 1))]
    pub verdict_grace_ms: u64,
}

impl ShutdownConfig {
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn verdict_grace(&self) -> Duration {
        Duration::from_millis(self.verdict_grace_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            exit_timeout_ms: 3000,
            kill_timeout_ms: 1000,
            drain_timeout_ms: 2000,
            verdict_grace_ms: 2000,
        }
    }
}
