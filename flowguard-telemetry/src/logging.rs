//! ## flowguard-telemetry::logging
//! **Structured logging with tracing and OpenTelemetry attributes**
//!
//! Security events (threat alerts, failed notifications, worker restarts) are
//! emitted inside a `security_event` span so they can be filtered apart from
//! ordinary progress logs.

use opentelemetry::KeyValue;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber. `RUST_LOG` wins over `level`.
    ///
    /// Returns `false` if a subscriber was already installed.
    pub fn init(level: &str) -> bool {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
            )
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .try_init()
            .is_ok()
    }

    /// Emits one security event; `attributes` render as `key=value` pairs.
    pub async fn log_event(event_type: &str, attributes: Vec<KeyValue>) {
        let span = info_span!(
            "security_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );
        let attributes = render_attributes(&attributes);

        async {
            info!(%attributes, "security event: {event_type}");
        }
        .instrument(span)
        .await
    }
}

fn render_attributes(attributes: &[KeyValue]) -> String {
    attributes
        .iter()
        .map(|kv| format!("{}={}", kv.key, kv.value))
        .collect::<Vec<_>>()
        .join(" ")
}
