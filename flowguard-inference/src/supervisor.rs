//! ## flowguard-inference::supervisor
//! **Lifecycle of the external inference process**
//!
//! ```text
//! NotStarted ──spawn──▶ Running ──graceful_shutdown──▶ ShuttingDown ──▶ Stopped
//!                          ▲                                              │
//!                          └──────────── restart (write failure) ─────────┘
//! ```
//!
//! Three tasks touch the process: callers of [`InferenceWorker::send`] (stdin,
//! serialized by a lock held only for write + flush), the response reader
//! (stdout, publishes decoded labels on a broadcast channel) and the
//! diagnostics reader (stderr, logs only).

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use flowguard_config::{ShutdownConfig, WorkerConfig};
use flowguard_telemetry::EventLogger;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{StartupError, WorkerError};
use crate::launch::{LaunchedProcess, WorkerCommand};
use crate::protocol::ResponseCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not started",
            WorkerState::Running => "running",
            WorkerState::ShuttingDown => "shutting down",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct InferenceWorker {
    command: WorkerCommand,
    codec: Arc<ResponseCodec>,
    terminate_token: String,
    shutdown: ShutdownConfig,

    running: Arc<AtomicBool>,
    state: Mutex<WorkerState>,
    restarting: AtomicBool,
    restarts: AtomicU64,
    /// Sticky once an owner asked for shutdown; no restart relaunches after it.
    shutdown_requested: AtomicBool,
    /// Held across a whole restart and a whole explicit shutdown.
    lifecycle: tokio::sync::Mutex<()>,
    /// Set while a live process exists that nobody has shut down yet.
    hook_armed: AtomicBool,

    stdin: tokio::sync::Mutex<Option<BufWriter<ChildStdin>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    verdicts: broadcast::Sender<String>,
}

impl InferenceWorker {
    /// Locates the interpreter and script, starts the process and both reader
    /// tasks. Startup failures are returned, never retried.
    #[instrument(skip_all, fields(script = %config.process.script.display()))]
    pub async fn spawn(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let (verdicts, _) = broadcast::channel(config.process.channel_capacity.max(1));
        let worker = Self {
            command: WorkerCommand::from_config(&config.process),
            codec: Arc::new(ResponseCodec::from_config(&config.protocol)),
            terminate_token: config.protocol.terminate_token.clone(),
            shutdown: config.shutdown.clone(),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(WorkerState::NotStarted),
            restarting: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            shutdown_requested: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
            hook_armed: AtomicBool::new(false),
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            verdicts,
        };
        worker.launch().await?;
        info!(executable = %worker.command.executable.display(), "inference worker started");
        Ok(worker)
    }

    async fn launch(&self) -> Result<(), StartupError> {
        let LaunchedProcess {
            child,
            stdin,
            stdout,
            stderr,
        } = self.command.launch()?;

        *self.stdin.lock().await = Some(BufWriter::new(stdin));
        *self.child.lock().await = Some(child);
        self.running.store(true, Ordering::Release);

        let responses = tokio::spawn(read_responses(
            stdout,
            Arc::clone(&self.codec),
            self.verdicts.clone(),
            Arc::clone(&self.running),
        ));
        let diagnostics = tokio::spawn(read_diagnostics(stderr));
        self.readers.lock().extend([responses, diagnostics]);

        *self.state.lock() = WorkerState::Running;
        self.hook_armed.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes one line. A write failure drops the line and restarts the
    /// process; nothing is returned to the caller. No-op once stopped.
    pub async fn send(&self, line: &str) {
        if !self.running.load(Ordering::Acquire) {
            debug!("inference worker not running, dropping line");
            return;
        }

        // The stdin lock is released before any restart begins.
        if let Err(e) = self.write_line(line).await {
            warn!(error = %e, "dropping flow line, restarting inference worker");
            self.restart().await;
        }
    }

    async fn write_line(&self, line: &str) -> Result<(), WorkerError> {
        let mut guard = self.stdin.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            WorkerError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(WorkerError::Write)?;
        writer.write_all(b"\n").await.map_err(WorkerError::Write)?;
        writer.flush().await.map_err(WorkerError::Write)
    }

    #[instrument(skip_all)]
    async fn restart(&self) {
        if self.restarting.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _lifecycle = self.lifecycle.lock().await;
            if self.shutdown_requested.load(Ordering::Acquire) {
                debug!("shutdown requested, not restarting");
            } else {
                self.relaunch().await;
            }
        }
        self.restarting.store(false, Ordering::Release);
    }

    async fn relaunch(&self) {
        let attempt = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
        EventLogger::log_event(
            "worker_restart",
            vec![KeyValue::new("attempt", attempt as i64)],
        )
        .await;

        if !self.teardown().await {
            return;
        }
        if self.shutdown_requested.load(Ordering::Acquire) {
            info!(attempt, "shutdown requested during restart, staying stopped");
            return;
        }
        match self.launch().await {
            Ok(()) => info!(attempt, "inference worker restarted"),
            Err(e) => error!(
                attempt,
                error = %e,
                "inference worker could not be restarted, staying stopped"
            ),
        }
    }

    /// Terminate handshake, then bounded waits escalating to a kill.
    ///
    /// Waits for an in-flight restart to finish first; a restart never
    /// relaunches once this has been called. Returns `true` for the call that
    /// performed the teardown; concurrent and repeated calls return `false`.
    #[instrument(skip_all)]
    pub async fn graceful_shutdown(&self) -> bool {
        self.shutdown_requested.store(true, Ordering::Release);
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await
    }

    async fn teardown(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = WorkerState::ShuttingDown;

        self.close_stdin().await;
        self.reap_child().await;
        self.drain_readers().await;

        self.hook_armed.store(false, Ordering::Release);
        *self.state.lock() = WorkerState::Stopped;
        info!("inference worker stopped");
        true
    }

    async fn close_stdin(&self) {
        let Ok(mut guard) = timeout(self.shutdown.exit_timeout(), self.stdin.lock()).await else {
            warn!("stdin busy, skipping terminate token");
            return;
        };
        let Some(mut writer) = guard.take() else {
            return;
        };
        let token = format!("{}\n", self.terminate_token);
        let handshake = async {
            writer.write_all(token.as_bytes()).await?;
            writer.flush().await?;
            writer.shutdown().await
        };
        if let Err(e) = handshake.await {
            debug!(error = %e, "terminate token not delivered");
        }
    }

    async fn reap_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        let exit_timeout = self.shutdown.exit_timeout();
        match timeout(exit_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "inference worker exited"),
            Ok(Err(e)) => warn!(error = %e, "waiting for inference worker failed"),
            Err(_) => {
                warn!("{}, killing", WorkerError::ShutdownTimeout(exit_timeout));
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "kill failed");
                }
                let kill_timeout = self.shutdown.kill_timeout();
                if timeout(kill_timeout, child.wait()).await.is_err() {
                    error!("{}", WorkerError::ShutdownTimeout(kill_timeout));
                }
            }
        }
    }

    async fn drain_readers(&self) {
        let readers = std::mem::take(&mut *self.readers.lock());
        let deadline = Instant::now() + self.shutdown.drain_timeout();
        for reader in readers {
            let abort = reader.abort_handle();
            if timeout_at(deadline, reader).await.is_err() {
                debug!("reader did not drain in time, aborting");
                abort.abort();
            }
        }
    }

    /// Every decoded label, in the order the process wrote them.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.verdicts.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Acquire)
    }
}

impl fmt::Debug for InferenceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceWorker")
            .field("command", &self.command)
            .field("state", &self.state())
            .field("restarts", &self.restart_count())
            .finish()
    }
}

/// Exit hook: a worker dropped without a graceful shutdown takes its process
/// down with it.
impl Drop for InferenceWorker {
    fn drop(&mut self) {
        if !self.hook_armed.swap(false, Ordering::AcqRel) {
            return;
        }
        warn!("inference worker dropped while running, killing process");
        if let Some(child) = self.child.get_mut().as_mut() {
            let _ = child.start_kill();
        }
        for reader in self.readers.get_mut().drain(..) {
            reader.abort();
        }
    }
}

async fn read_responses(
    stdout: ChildStdout,
    codec: Arc<ResponseCodec>,
    verdicts: broadcast::Sender<String>,
    running: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match codec.decode(&line) {
                Some(label) => {
                    if verdicts.send(label).is_err() {
                        trace!("no verdict subscribers");
                    }
                }
                None => debug!(target: "flowguard::worker::stdout", "{line}"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "reading worker stdout failed");
                break;
            }
        }
    }

    if running.load(Ordering::Acquire) {
        error!("{}", WorkerError::ReadStreamClosed);
    } else {
        debug!("worker stdout closed");
    }
}

async fn read_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        warn!(target: "flowguard::worker::stderr", "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{sh_config, write_script, ECHO_WORKER};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn next(rx: &mut broadcast::Receiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("verdict in time")
            .expect("channel open")
    }

    async fn echo_worker(dir: &TempDir) -> InferenceWorker {
        let script = write_script(dir, "echo.sh", ECHO_WORKER);
        InferenceWorker::spawn(&sh_config(script)).await.unwrap()
    }

    #[tokio::test]
    async fn verdicts_follow_receipt_order_for_every_subscriber() {
        let dir = TempDir::new().unwrap();
        let worker = echo_worker(&dir).await;
        let mut first = worker.subscribe();
        let mut second = worker.subscribe();

        worker.send("DDOS").await;
        worker.send("BENIGN").await;

        for rx in [&mut first, &mut second] {
            assert_eq!(next(rx).await, "DDOS");
            assert_eq!(next(rx).await, "BENIGN");
        }
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(worker.graceful_shutdown().await);
    }

    #[tokio::test]
    async fn info_lines_reach_no_subscriber() {
        let dir = TempDir::new().unwrap();
        let worker = echo_worker(&dir).await;
        let mut rx = worker.subscribe();

        worker.send("PortScan").await;
        assert_eq!(next(&mut rx).await, "PortScan");
        worker.graceful_shutdown().await;
        // Only the result line was ever published.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_never_interleave() {
        let dir = TempDir::new().unwrap();
        let worker = Arc::new(echo_worker(&dir).await);
        let mut rx = worker.subscribe();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let worker = Arc::clone(&worker);
                tokio::spawn(async move { worker.send(&format!("flow-{i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            seen.push(next(&mut rx).await);
        }
        seen.sort();
        let mut expected: Vec<String> = (0..32).map(|i| format!("flow-{i}")).collect();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(worker.restart_count(), 0);
        worker.graceful_shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_shutdown_tears_down_once() {
        let dir = TempDir::new().unwrap();
        let worker = Arc::new(echo_worker(&dir).await);

        let a = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.graceful_shutdown().await }
        });
        let b = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.graceful_shutdown().await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a ^ b);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!worker.is_running());
        assert!(!worker.graceful_shutdown().await);
    }

    #[tokio::test]
    async fn failed_restart_leaves_worker_stopped() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "gone.sh", "exit 0\n");
        let worker = InferenceWorker::spawn(&sh_config(script.clone()))
            .await
            .unwrap();

        // Let the process exit, then make relaunching impossible.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::remove_file(&script).unwrap();

        worker.send("flow-A").await;
        assert_eq!(worker.restart_count(), 1);
        assert!(!worker.is_running());
        assert_eq!(worker.state(), WorkerState::Stopped);

        worker.send("flow-B").await;
        assert_eq!(worker.restart_count(), 1);
    }

    #[tokio::test]
    async fn write_failure_restarts_a_fresh_process() {
        let dir = TempDir::new().unwrap();
        // Exits after the first line; the relaunched copy keeps serving.
        let script = write_script(
            &dir,
            "once.sh",
            "IFS= read -r line\necho \"[RESULT] $line\"\nexit 0\n",
        );
        let worker = InferenceWorker::spawn(&sh_config(script)).await.unwrap();
        let mut rx = worker.subscribe();

        worker.send("first").await;
        assert_eq!(next(&mut rx).await, "first");
        tokio::time::sleep(Duration::from_millis(300)).await;

        worker.send("lost").await;
        assert_eq!(worker.restart_count(), 1);
        assert!(worker.is_running());

        worker.send("second").await;
        assert_eq!(next(&mut rx).await, "second");
        worker.graceful_shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_during_restart_keeps_worker_stopped() {
        let dir = TempDir::new().unwrap();
        // Refuses input, then outlives the exit timeout.
        let script = write_script(&dir, "deaf.sh", "exec 0<&-\nexec sleep 5\n");
        let mut config = sh_config(script);
        config.shutdown.exit_timeout_ms = 800;
        config.shutdown.drain_timeout_ms = 500;
        let worker = Arc::new(InferenceWorker::spawn(&config).await.unwrap());
        tokio::time::sleep(Duration::from_millis(300)).await;

        let sender = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.send("flow-A").await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        worker.graceful_shutdown().await;
        timeout(Duration::from_secs(10), sender)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(worker.restart_count(), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!worker.is_running());

        worker.send("flow-B").await;
        assert_eq!(worker.restart_count(), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn unresponsive_worker_is_killed() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "stuck.sh", "exec sleep 30\n");
        let mut config = sh_config(script);
        config.shutdown.exit_timeout_ms = 100;
        config.shutdown.drain_timeout_ms = 500;
        let worker = InferenceWorker::spawn(&config).await.unwrap();

        let started = std::time::Instant::now();
        assert!(worker.graceful_shutdown().await);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(logs_contain("did not exit within"));
    }

    #[tokio::test]
    async fn missing_script_fails_startup() {
        let config = sh_config("/nonexistent/model.py".into());
        let err = InferenceWorker::spawn(&config).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Startup(StartupError::ScriptNotFound(_))
        ));
    }
}
