use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Where completed flows are archived. One file per day:
/// `<directory>/<YYYY-MM-DD><file_suffix>`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SinkConfig {
    pub directory: PathBuf,

    #[validate(length(min = 1))]
    pub file_suffix: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/daily"),
            file_suffix: "_Flow.csv".into(),
        }
    }
}
