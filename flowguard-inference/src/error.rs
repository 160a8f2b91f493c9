use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Launch failures. Fatal: initialization is never retried automatically.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("worker executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("worker script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("worker {0} was not piped")]
    MissingPipe(&'static str),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    /// The line is dropped and the worker restarted.
    #[error("write to worker failed: {0}")]
    Write(#[source] io::Error),

    #[error("worker output closed while running")]
    ReadStreamClosed,

    #[error("worker did not exit within {0:?}")]
    ShutdownTimeout(Duration),
}
