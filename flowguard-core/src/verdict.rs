//! Classification labels.
//!
//! The worker answers each flow with a label. Exactly one label, `BENIGN`,
//! means "no threat"; the comparison is case-sensitive, so `benign` is a
//! threat label like any other.

use std::fmt;

use serde::Serialize;

pub const BENIGN: &str = "BENIGN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Benign,
    Threat(String),
}

impl Verdict {
    /// Trims the label; an empty label is not a verdict.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "" => None,
            BENIGN => Some(Verdict::Benign),
            other => Some(Verdict::Threat(other.to_string())),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Verdict::Benign => BENIGN,
            Verdict::Threat(label) => label,
        }
    }

    pub fn is_threat(&self) -> bool {
        matches!(self, Verdict::Threat(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_sentinel_is_case_sensitive() {
        assert_eq!(Verdict::parse("BENIGN"), Some(Verdict::Benign));
        assert_eq!(
            Verdict::parse("benign"),
            Some(Verdict::Threat("benign".into()))
        );
    }

    #[test]
    fn labels_are_trimmed() {
        assert_eq!(Verdict::parse("  BENIGN \n"), Some(Verdict::Benign));
        assert_eq!(Verdict::parse(" DDOS "), Some(Verdict::Threat("DDOS".into())));
    }

    #[test]
    fn empty_label_is_not_a_verdict() {
        assert_eq!(Verdict::parse(""), None);
        assert_eq!(Verdict::parse("   "), None);
    }

    proptest::proptest! {
        #[test]
        fn parsed_labels_are_never_padded(label in "\\PC{0,16}") {
            if let Some(verdict) = Verdict::parse(&label) {
                proptest::prop_assert_eq!(verdict.label(), label.trim());
                proptest::prop_assert!(!verdict.label().is_empty());
            }
        }
    }
}
