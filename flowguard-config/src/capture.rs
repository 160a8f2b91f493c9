//! Live capture parameters and flow timeouts.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface used when none is given on the command line.
    #[validate(custom(function = validation::validate_interface))]
    pub interface: String,

    pub promiscuous: bool,

    /// Snapshot length in bytes.
    #[validate(range(min = 64, max = 262144))]
    pub snaplen: i32,

    /// Read timeout; bounds how long an idle link delays a stop request.
    #[validate(range(min = 1, max = 60000))]
    pub read_timeout_ms: i32,

    /// Maximum flow lifetime.
    #[validate(range(min = 1))]
    pub flow_timeout_secs: u64,

    /// Maximum idle gap inside one flow.
    #[validate(range(min = 1))]
    pub activity_timeout_secs: u64,
}

impl CaptureConfig {
    pub fn flow_timeout_us(&self) -> i64 {
        secs_to_us(self.flow_timeout_secs)
    }

    pub fn activity_timeout_us(&self) -> i64 {
        secs_to_us(self.activity_timeout_secs)
    }
}

fn secs_to_us(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1_000_000)).unwrap_or(i64::MAX)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            promiscuous: true,
            snaplen: 64 * 1024,
            read_timeout_ms: 1000,
            flow_timeout_secs: 120,
            activity_timeout_secs: 5,
        }
    }
}
