//! ## flowguard-engine::alert
//! **Verdict handling and the alert latch**
//!
//! A threat verdict raises an alert only if no alert of the same run is still
//! being surfaced. The latch is acquired on the dispatch task, and released
//! once the alert has been presented, whether or not the notification
//! succeeded. Threat verdicts that find the latch set are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowguard_core::events::PipelineEvent;
use flowguard_core::Verdict;
use flowguard_notify::AlertNotifier;
use flowguard_telemetry::{EventLogger, MetricsRecorder, VerdictKind};
use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct AlertLatch(AtomicBool);

impl AlertLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the latch; `false` if it was already set.
    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the latch when the alert task ends, including on abort or panic.
struct LatchGuard(Arc<AlertLatch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatAlert {
    pub interface: String,
    pub verdict: String,
    pub raised_at: DateTime<Utc>,
}

/// Surfaces an alert to the user. Returning means the alert was acknowledged.
#[async_trait]
pub trait AlertPresenter: Send + Sync {
    async fn present(&self, alert: &ThreatAlert);
}

#[derive(Debug)]
pub enum VerdictAction {
    /// Empty label.
    Ignored,
    Benign,
    /// An alert task was started.
    Raised(JoinHandle<()>),
    /// Dropped because an earlier alert is still pending.
    Suppressed,
}

#[derive(Clone)]
pub struct VerdictHandler {
    interface: String,
    latch: Arc<AlertLatch>,
    notifier: Option<Arc<dyn AlertNotifier>>,
    presenter: Arc<dyn AlertPresenter>,
    metrics: MetricsRecorder,
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl VerdictHandler {
    pub fn new(
        interface: impl Into<String>,
        latch: Arc<AlertLatch>,
        notifier: Option<Arc<dyn AlertNotifier>>,
        presenter: Arc<dyn AlertPresenter>,
        metrics: MetricsRecorder,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Self {
        Self {
            interface: interface.into(),
            latch,
            notifier,
            presenter,
            metrics,
            events,
        }
    }

    pub fn latch(&self) -> &Arc<AlertLatch> {
        &self.latch
    }

    /// Must be called from within a tokio runtime.
    pub fn handle(&self, label: &str) -> VerdictAction {
        let Some(verdict) = Verdict::parse(label) else {
            return VerdictAction::Ignored;
        };
        let _ = self.events.send(PipelineEvent::Verdict(verdict.clone()));

        let Verdict::Threat(label) = verdict else {
            self.metrics.inc_verdict(VerdictKind::Benign);
            debug!(interface = %self.interface, "benign flow");
            return VerdictAction::Benign;
        };
        self.metrics.inc_verdict(VerdictKind::Threat);

        if !self.latch.try_acquire() {
            self.metrics.alerts_suppressed.inc();
            debug!(verdict = %label, "alert pending, dropping threat verdict");
            return VerdictAction::Suppressed;
        }
        self.metrics.alerts_raised.inc();

        let alert = ThreatAlert {
            interface: self.interface.clone(),
            verdict: label,
            raised_at: Utc::now(),
        };
        let guard = LatchGuard(Arc::clone(&self.latch));
        let handler = self.clone();
        VerdictAction::Raised(tokio::spawn(async move {
            let _guard = guard;
            handler.raise(alert).await;
        }))
    }

    async fn raise(&self, alert: ThreatAlert) {
        info!(verdict = %alert.verdict, interface = %alert.interface, "threat detected");
        EventLogger::log_event(
            "threat_alert",
            vec![
                KeyValue::new("verdict", alert.verdict.clone()),
                KeyValue::new("interface", alert.interface.clone()),
            ],
        )
        .await;

        if let Some(notifier) = &self.notifier {
            let timer = self.metrics.notification_latency.start_timer();
            match notifier.notify(&alert.verdict).await {
                Ok(()) => timer.observe_duration(),
                Err(e) => {
                    timer.stop_and_discard();
                    self.metrics.notification_failures.inc();
                    warn!(error = %e, "threat notification failed");
                    EventLogger::log_event(
                        "notification_failed",
                        vec![
                            KeyValue::new("verdict", alert.verdict.clone()),
                            KeyValue::new("error", e.to_string()),
                        ],
                    )
                    .await;
                }
            }
        }

        self.presenter.present(&alert).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{GatedPresenter, RecordingNotifier};
    use flowguard_notify::NotifyError;
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    struct FailingNotifier;

    #[async_trait]
    impl AlertNotifier for FailingNotifier {
        async fn notify(&self, _verdict: &str) -> Result<(), NotifyError> {
            Err(NotifyError::InvalidUrl {
                url: "http://alerts.invalid".into(),
                reason: "unreachable".into(),
            })
        }
    }

    fn handler(
        notifier: Option<Arc<dyn AlertNotifier>>,
        presenter: Arc<dyn AlertPresenter>,
    ) -> (VerdictHandler, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = VerdictHandler::new(
            "eth0",
            Arc::new(AlertLatch::new()),
            notifier,
            presenter,
            MetricsRecorder::new().unwrap(),
            tx,
        );
        (handler, rx)
    }

    #[test]
    fn latch_admits_one_holder() {
        let latch = AlertLatch::new();
        assert!(latch.try_acquire());
        assert!(!latch.try_acquire());
        assert!(latch.is_set());
        latch.release();
        assert!(latch.try_acquire());
    }

    #[tokio::test]
    async fn benign_verdicts_only_log() {
        let (presenter, mut shown, _) = GatedPresenter::new(false);
        let notifier = Arc::new(RecordingNotifier::default());
        let (handler, mut events) = handler(Some(notifier.clone()), presenter);

        assert!(matches!(handler.handle("BENIGN"), VerdictAction::Benign));
        assert!(matches!(handler.handle("   "), VerdictAction::Ignored));

        assert!(matches!(
            events.try_recv(),
            Ok(PipelineEvent::Verdict(Verdict::Benign))
        ));
        assert!(events.try_recv().is_err());
        assert!(shown.try_recv().is_err());
        assert!(notifier.calls.lock().is_empty());
        assert!(!handler.latch().is_set());
    }

    #[tokio::test]
    async fn threat_notifies_presents_then_clears_latch() {
        let (presenter, mut shown, _) = GatedPresenter::new(false);
        let notifier = Arc::new(RecordingNotifier::default());
        let (handler, _events) = handler(Some(notifier.clone()), presenter);

        let VerdictAction::Raised(task) = handler.handle("DDOS") else {
            panic!("threat should raise an alert");
        };
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        assert_eq!(shown.recv().await.as_deref(), Some("DDOS"));
        assert_eq!(*notifier.calls.lock(), vec!["DDOS".to_string()]);
        assert!(!handler.latch().is_set());
        assert_eq!(handler.metrics.alerts_raised.get(), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn threats_during_a_pending_alert_are_dropped() {
        let (presenter, mut shown, acknowledge) = GatedPresenter::new(true);
        let notifier = Arc::new(RecordingNotifier::default());
        let (handler, _events) = handler(Some(notifier.clone()), presenter);

        let VerdictAction::Raised(first) = handler.handle("DDOS") else {
            panic!("first threat should raise");
        };
        assert_eq!(shown.recv().await.as_deref(), Some("DDOS"));

        assert!(matches!(handler.handle("PortScan"), VerdictAction::Suppressed));
        assert!(matches!(handler.handle("Bot"), VerdictAction::Suppressed));
        assert_eq!(notifier.calls.lock().len(), 1);
        assert_eq!(handler.metrics.alerts_suppressed.get(), 2);
        assert!(logs_contain("alert pending, dropping threat verdict"));

        acknowledge.notify_one();
        timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
        assert!(!handler.latch().is_set());

        // A new episode alerts again.
        let VerdictAction::Raised(second) = handler.handle("Bot") else {
            panic!("latch should be clear");
        };
        assert_eq!(shown.recv().await.as_deref(), Some("Bot"));
        acknowledge.notify_one();
        timeout(Duration::from_secs(5), second).await.unwrap().unwrap();
        assert_eq!(notifier.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn failed_notification_still_presents() {
        let (presenter, mut shown, _) = GatedPresenter::new(false);
        let (handler, _events) = handler(Some(Arc::new(FailingNotifier)), presenter);

        let VerdictAction::Raised(task) = handler.handle("Infiltration") else {
            panic!("threat should raise");
        };
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        assert_eq!(shown.recv().await.as_deref(), Some("Infiltration"));
        assert_eq!(handler.metrics.notification_failures.get(), 1);
        assert!(!handler.latch().is_set());
    }

    #[tokio::test]
    async fn aborted_alert_releases_latch() {
        let (presenter, mut shown, _) = GatedPresenter::new(true);
        let (handler, _events) = handler(None, presenter);

        let VerdictAction::Raised(task) = handler.handle("DDOS") else {
            panic!("threat should raise");
        };
        shown.recv().await;
        assert!(handler.latch().is_set());
        task.abort();
        let _ = task.await;
        assert!(!handler.latch().is_set());
    }
}
