//! Custom validation functions shared by the configuration sections.

use std::sync::LazyLock;

use regex::Regex;
use validator::ValidationError;

static INTERFACE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.:@\-]+$").expect("static regex"));

static LOG_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:trace|debug|info|warn|error|off)$").expect("static regex")
});

/// Interface names as pcap reports them (`eth0`, `en0`, `wlp2s0`, `br-1a2b`).
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    if !name.is_empty() && name.len() <= 64 && INTERFACE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LOG_LEVEL.is_match(level) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

/// Protocol markers must be non-empty and fit on one line.
pub fn validate_marker(marker: &str) -> Result<(), ValidationError> {
    if marker.is_empty() || marker.contains(['\n', '\r']) {
        Err(ValidationError::new("invalid_marker"))
    } else {
        Ok(())
    }
}

pub fn validate_line_format(format: &str) -> Result<(), ValidationError> {
    match format.to_ascii_lowercase().as_str() {
        "json" | "csv" => Ok(()),
        _ => Err(ValidationError::new("invalid_line_format")),
    }
}
