use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` was called while a run had not yet finished.
    #[error("a capture run on {0} is still active")]
    RunActive(String),
}
