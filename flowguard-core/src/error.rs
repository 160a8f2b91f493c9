use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Unknown flow line format: {0}")]
    UnknownFormat(String),

    #[error("Failed to encode flow record: {0}")]
    Encode(#[from] serde_json::Error),
}
