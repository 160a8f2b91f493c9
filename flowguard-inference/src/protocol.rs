//! Worker stdout decoding.
//!
//! Each stdout line is either a diagnostic (starts with the info marker) or a
//! result: `[<result marker>] <label><delimiter><extra fields...>`. Only the
//! trimmed first field is kept.

use flowguard_config::ProtocolConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCodec {
    info_marker: String,
    result_marker: String,
    delimiter: String,
}

impl ResponseCodec {
    pub fn new(
        info_marker: impl Into<String>,
        result_marker: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        Self {
            info_marker: info_marker.into(),
            result_marker: result_marker.into(),
            delimiter: delimiter.into(),
        }
    }

    pub fn from_config(protocol: &ProtocolConfig) -> Self {
        Self::new(
            &protocol.info_marker,
            &protocol.result_marker,
            &protocol.field_delimiter,
        )
    }

    /// Returns the label to dispatch, or `None` for diagnostics and blank results.
    pub fn decode(&self, line: &str) -> Option<String> {
        if !self.info_marker.is_empty() && line.starts_with(&self.info_marker) {
            return None;
        }

        let mut body = line.trim_start();
        if !self.result_marker.is_empty() {
            body = body.strip_prefix(&self.result_marker).unwrap_or(body);
        }

        let label = body.split(self.delimiter.as_str()).next()?.trim();
        if label.is_empty() {
            None
        } else {
            Some(label.to_string())
        }
    }
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::from_config(&ProtocolConfig::default())
    }
}
