use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NotifyConfig {
    /// Endpoint receiving `{"result": "<label>"}`; notifications are off when unset.
    #[validate(url)]
    pub url: Option<String>,

    #[validate(range(min = 100, max = 60000))]
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 5000,
        }
    }
}
