use std::fmt;

use async_trait::async_trait;
use chrono::Local;
use flowguard_engine::{AlertPresenter, ThreatAlert};

/// Prints alerts to the terminal; acknowledged as soon as printed.
#[derive(Debug, Default)]
pub struct TerminalPresenter;

#[async_trait]
impl AlertPresenter for TerminalPresenter {
    async fn present(&self, alert: &ThreatAlert) {
        println!(
            "[{}] ALERT {}: {} traffic detected",
            alert.raised_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            alert.interface,
            alert.verdict
        );
    }
}

/// Flows archived during a run. Displays as `999+` past 999.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlowCounter(u64);

const DISPLAY_MAX: u64 = 999;

impl FlowCounter {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 > DISPLAY_MAX {
            write!(f, "{DISPLAY_MAX}+")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates_its_display() {
        let mut counter = FlowCounter::default();
        assert_eq!(counter.to_string(), "0");
        for _ in 0..999 {
            counter.increment();
        }
        assert_eq!(counter.to_string(), "999");
        counter.increment();
        assert_eq!(counter.to_string(), "999+");
        assert_eq!(counter.get(), 1000);
    }
}
