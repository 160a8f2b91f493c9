//! ## flowguard-telemetry::metrics
//! **Prometheus counters for one pipeline process**

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Benign,
    Threat,
}

impl VerdictKind {
    fn as_label(self) -> &'static str {
        match self {
            VerdictKind::Benign => "benign",
            VerdictKind::Threat => "threat",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub flows: IntCounter,
    pub verdicts: IntCounterVec,
    pub alerts_raised: IntCounter,
    pub alerts_suppressed: IntCounter,
    pub notification_failures: IntCounter,
    pub notification_latency: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let flows = IntCounter::new("flowguard_flows_total", "Completed flows dispatched")?;
        let verdicts = IntCounterVec::new(
            Opts::new("flowguard_verdicts_total", "Verdicts received from the worker"),
            &["kind"],
        )?;
        let alerts_raised =
            IntCounter::new("flowguard_alerts_raised_total", "Threat alerts raised")?;
        let alerts_suppressed = IntCounter::new(
            "flowguard_alerts_suppressed_total",
            "Threat verdicts dropped while an alert was pending",
        )?;
        let notification_failures = IntCounter::new(
            "flowguard_notification_failures_total",
            "Failed threat notifications",
        )?;
        let notification_latency = Histogram::with_opts(
            HistogramOpts::new(
                "flowguard_notification_seconds",
                "Threat notification round-trip time",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        registry.register(Box::new(flows.clone()))?;
        registry.register(Box::new(verdicts.clone()))?;
        registry.register(Box::new(alerts_raised.clone()))?;
        registry.register(Box::new(alerts_suppressed.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;
        registry.register(Box::new(notification_latency.clone()))?;

        Ok(Self {
            registry,
            flows,
            verdicts,
            alerts_raised,
            alerts_suppressed,
            notification_failures,
            notification_latency,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn inc_flows(&self) {
        self.flows.inc();
    }

    pub fn inc_verdict(&self, kind: VerdictKind) {
        self.verdicts.with_label_values(&[kind.as_label()]).inc();
    }

    pub fn verdict_count(&self, kind: VerdictKind) -> u64 {
        self.verdicts.with_label_values(&[kind.as_label()]).get()
    }
}
