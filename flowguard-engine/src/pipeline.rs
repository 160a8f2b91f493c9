//! ## flowguard-engine::pipeline
//! **Capture runs**
//!
//! One run at a time. A run owns a cancel token, an alert latch and a status
//! channel; the worker, the sink and the presenter are shared by every run.
//!
//! Per run:
//! - the capture loop runs on a blocking thread and hands each completed flow
//!   to the dispatcher (event, CSV row, worker line)
//! - a forwarder task writes worker lines in flow order
//! - a verdict task consumes the worker's broadcast and drives the
//!   [`VerdictHandler`]
//!
//! When capture ends the verdict task outlives the forwarder until every
//! forwarded line has been answered, bounded by the verdict grace period.

use std::sync::Arc;
use std::time::Duration;

use flowguard_capture::{run_capture_loop, CancelToken, CaptureExit, SourceOpener};
use flowguard_config::ShutdownConfig;
use flowguard_core::events::{PipelineEvent, RunOutcome, RunState};
use flowguard_core::{BasicFlowGenerator, FlowGenerator, FlowRecord, LineFormat};
use flowguard_inference::InferenceWorker;
use flowguard_notify::{AlertNotifier, Notifier, DEFAULT_TIMEOUT};
use flowguard_telemetry::MetricsRecorder;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::alert::{AlertLatch, AlertPresenter, VerdictHandler};
use crate::error::EngineError;
use crate::sink::CsvSink;

/// Builds a fresh generator for each run.
pub type GeneratorFactory = Arc<dyn Fn() -> Box<dyn FlowGenerator> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub state: RunState,
    /// Set together with `Stopped`.
    pub outcome: Option<RunOutcome>,
}

struct ActiveRun {
    interface: String,
    cancel: CancelToken,
    latch: Arc<AlertLatch>,
    status: Arc<watch::Sender<RunStatus>>,
}

impl ActiveRun {
    fn state(&self) -> RunState {
        self.status.borrow().state
    }
}

pub struct Pipeline {
    worker: Arc<InferenceWorker>,
    opener: Arc<dyn SourceOpener>,
    generators: GeneratorFactory,
    sink: Arc<CsvSink>,
    presenter: Arc<dyn AlertPresenter>,
    metrics: MetricsRecorder,
    line_format: LineFormat,
    notify_timeout: Duration,
    verdict_grace: Duration,
    events: mpsc::UnboundedSender<PipelineEvent>,
    run: Mutex<Option<ActiveRun>>,
}

impl Pipeline {
    /// Returns the pipeline and the receiver of its progress events.
    pub fn new(
        worker: Arc<InferenceWorker>,
        opener: Arc<dyn SourceOpener>,
        sink: Arc<CsvSink>,
        presenter: Arc<dyn AlertPresenter>,
        metrics: MetricsRecorder,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            worker,
            opener,
            generators: Arc::new(|| Box::new(BasicFlowGenerator::default())),
            sink,
            presenter,
            metrics,
            line_format: LineFormat::default(),
            notify_timeout: DEFAULT_TIMEOUT,
            verdict_grace: ShutdownConfig::default().verdict_grace(),
            events,
            run: Mutex::new(None),
        };
        (pipeline, rx)
    }

    pub fn with_generator(mut self, generators: GeneratorFactory) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_line_format(mut self, line_format: LineFormat) -> Self {
        self.line_format = line_format;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// How long a run that stopped capturing still waits for verdicts.
    pub fn with_verdict_grace(mut self, grace: Duration) -> Self {
        self.verdict_grace = grace;
        self
    }

    /// Starts a run; notifications go to `notify_url` when one is given.
    /// An unusable URL disables notifications for the run, it does not
    /// prevent it.
    pub fn start(&self, interface: &str, notify_url: Option<&str>) -> Result<(), EngineError> {
        let notifier = notify_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .and_then(|url| match Notifier::new(url, self.notify_timeout) {
                Ok(notifier) => Some(Arc::new(notifier) as Arc<dyn AlertNotifier>),
                Err(e) => {
                    warn!(error = %e, "notifications disabled for this run");
                    None
                }
            });
        self.start_with_notifier(interface, notifier)
    }

    #[instrument(skip(self, notifier), fields(notify = notifier.is_some()))]
    pub fn start_with_notifier(
        &self,
        interface: &str,
        notifier: Option<Arc<dyn AlertNotifier>>,
    ) -> Result<(), EngineError> {
        let mut run = self.run.lock();
        if let Some(active) = run.as_ref() {
            if !active.state().is_terminal() {
                warn!(active = %active.interface, "capture run already active, ignoring start");
                return Err(EngineError::RunActive(active.interface.clone()));
            }
        }

        let cancel = CancelToken::new();
        let latch = Arc::new(AlertLatch::new());
        let (status, _) = watch::channel(RunStatus {
            state: RunState::Listening,
            outcome: None,
        });
        let status = Arc::new(status);

        let handler = VerdictHandler::new(
            interface,
            Arc::clone(&latch),
            notifier,
            Arc::clone(&self.presenter),
            self.metrics.clone(),
            self.events.clone(),
        );
        let context = RunContext {
            interface: interface.to_string(),
            cancel: cancel.clone(),
            opener: Arc::clone(&self.opener),
            generator: (self.generators)(),
            worker: Arc::clone(&self.worker),
            handler,
            dispatcher: FlowDispatcher {
                line_format: self.line_format,
                sink: Arc::clone(&self.sink),
                metrics: self.metrics.clone(),
                events: self.events.clone(),
                lines: None,
            },
            status: Arc::clone(&status),
            verdict_grace: self.verdict_grace,
        };
        tokio::spawn(execute_run(context));

        *run = Some(ActiveRun {
            interface: interface.to_string(),
            cancel,
            latch,
            status,
        });
        Ok(())
    }

    /// Asks the current run to stop after the packet in hand. `false` if no
    /// run is active.
    pub fn stop(&self) -> bool {
        let run = self.run.lock();
        let Some(active) = run.as_ref() else {
            return false;
        };
        if active.state().is_terminal() {
            return false;
        }
        active.cancel.cancel();
        active.status.send_if_modified(|status| {
            if status.state == RunState::Listening {
                status.state = RunState::Stopping;
                true
            } else {
                false
            }
        });
        info!(interface = %active.interface, "stopping capture");
        true
    }

    pub fn state(&self) -> RunState {
        self.run
            .lock()
            .as_ref()
            .map_or(RunState::Idle, ActiveRun::state)
    }

    /// Whether the current run has an alert being surfaced.
    pub fn alert_pending(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|active| active.latch.is_set())
    }

    /// Waits for the current run to end. `None` if there is no run.
    pub async fn wait(&self) -> Option<RunOutcome> {
        let mut status = self.run.lock().as_ref()?.status.subscribe();
        let done = status.wait_for(|s| s.outcome.is_some()).await.ok()?;
        done.outcome.clone()
    }
}

struct RunContext {
    interface: String,
    cancel: CancelToken,
    opener: Arc<dyn SourceOpener>,
    generator: Box<dyn FlowGenerator>,
    worker: Arc<InferenceWorker>,
    handler: VerdictHandler,
    dispatcher: FlowDispatcher,
    status: Arc<watch::Sender<RunStatus>>,
    verdict_grace: Duration,
}

/// Fans one flow out to the event stream, the sink and the worker.
struct FlowDispatcher {
    line_format: LineFormat,
    sink: Arc<CsvSink>,
    metrics: MetricsRecorder,
    events: mpsc::UnboundedSender<PipelineEvent>,
    lines: Option<mpsc::UnboundedSender<String>>,
}

impl FlowDispatcher {
    fn dispatch(&self, flow: FlowRecord) {
        self.metrics.inc_flows();
        let line = self
            .line_format
            .encode(&flow)
            .map_err(|e| error!(flow = %flow.flow_id, error = %e, "cannot encode flow"))
            .ok();

        let _ = self.events.send(PipelineEvent::Flow(flow.clone()));
        if !self.sink.append(flow) {
            warn!("csv sink closed, flow not archived");
        }
        if let (Some(line), Some(lines)) = (line, &self.lines) {
            let _ = lines.send(line);
        }
    }
}

#[instrument(skip_all, fields(interface = %context.interface))]
async fn execute_run(context: RunContext) {
    let RunContext {
        interface,
        cancel,
        opener,
        generator,
        worker,
        handler,
        mut dispatcher,
        status,
        verdict_grace,
    } = context;

    let mut verdicts = worker.subscribe();
    let (answered_tx, mut answered) = watch::channel(0u64);
    let verdict_task = tokio::spawn(async move {
        loop {
            match verdicts.recv().await {
                Ok(label) => {
                    handler.handle(&label);
                    answered_tx.send_modify(|n| *n += 1);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "verdicts skipped, pipeline lagging");
                    answered_tx.send_modify(|n| *n += skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (lines, mut pending) = mpsc::unbounded_channel::<String>();
    dispatcher.lines = Some(lines);
    let forwarder = tokio::spawn(async move {
        // Lines dropped by a stopped or restarting worker are never answered.
        let mut forwarded = 0u64;
        while let Some(line) = pending.recv().await {
            let restarts = worker.restart_count();
            worker.send(&line).await;
            if worker.is_running() && worker.restart_count() == restarts {
                forwarded += 1;
            }
        }
        forwarded
    });

    let events = dispatcher.events.clone();
    let capture_interface = interface.clone();
    let capture = tokio::task::spawn_blocking(move || {
        capture_flows(
            opener.as_ref(),
            &capture_interface,
            &cancel,
            generator,
            dispatcher,
        )
    });
    let outcome = capture
        .await
        .unwrap_or_else(|e| RunOutcome::Error(format!("capture thread failed: {e}")));

    // The dispatcher is gone, so the forwarder ends once the queue is empty.
    let forwarded = forwarder.await.unwrap_or_else(|e| {
        error!(error = %e, "flow forwarder failed");
        0
    });
    let settled = timeout(verdict_grace, answered.wait_for(|n| *n >= forwarded))
        .await
        .map(|answered_all| answered_all.is_ok());
    match settled {
        Ok(true) => debug!(forwarded, "all forwarded flows answered"),
        Ok(false) => debug!("verdict stream closed before all flows were answered"),
        Err(_) => warn!(
            forwarded,
            answered = *answered.borrow(),
            "verdicts still outstanding after grace period"
        ),
    }
    verdict_task.abort();

    let line = outcome.status_line(&interface);
    match &outcome {
        RunOutcome::Error(reason) | RunOutcome::OpenFailed(reason) => {
            warn!(%reason, "{line}")
        }
        _ => info!("{line}"),
    }
    let _ = events.send(PipelineEvent::Status(line));
    let _ = events.send(PipelineEvent::Finished {
        interface,
        outcome: outcome.clone(),
    });
    status.send_modify(|status| {
        status.state = RunState::Stopped;
        status.outcome = Some(outcome);
    });
}

fn capture_flows(
    opener: &dyn SourceOpener,
    interface: &str,
    cancel: &CancelToken,
    mut generator: Box<dyn FlowGenerator>,
    dispatcher: FlowDispatcher,
) -> RunOutcome {
    let mut source = match opener.open(interface) {
        Ok(source) => source,
        Err(e) => return RunOutcome::OpenFailed(format!("open {interface} fail -> {e}")),
    };
    let _ = dispatcher
        .events
        .send(PipelineEvent::Status(format!("listening: {interface}")));
    info!(interface, "listening");

    let exit = run_capture_loop(source.as_mut(), cancel, |packet| {
        if let Some(flow) = generator.add_packet(packet) {
            dispatcher.dispatch(flow);
        }
    });

    match exit {
        CaptureExit::Finished => {
            let remaining = generator.drain();
            debug!(flows = remaining.len(), "flushing open flows");
            for flow in remaining {
                dispatcher.dispatch(flow);
            }
            RunOutcome::Finished
        }
        CaptureExit::Stopped => RunOutcome::Stopped,
        CaptureExit::Failed(reason) => RunOutcome::Error(reason),
    }
}
