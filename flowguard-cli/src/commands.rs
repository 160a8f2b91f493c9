use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use flowguard_capture::{list_interfaces, PcapFileOpener, PcapOpener, SourceOpener};
use flowguard_config::FlowguardConfig;
use flowguard_core::events::{PipelineEvent, RunOutcome};
use flowguard_core::{BasicFlowGenerator, FlowGenerator, LineFormat};
use flowguard_engine::{CsvSink, Pipeline};
use flowguard_inference::WorkerHost;
use flowguard_telemetry::{EventLogger, MetricsRecorder};
use tracing::{debug, info, instrument, warn};

use crate::presenter::{FlowCounter, TerminalPresenter};

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/flowguard.yaml plus FLOWGUARD_* variables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture on a live interface and classify its flows
    Run(RunArgs),
    /// Feed a capture file through the pipeline
    Replay(ReplayArgs),
    /// List interfaces available for capture
    Interfaces,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Interface to listen on; defaults to capture.interface
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Endpoint notified of threats; defaults to notify.url
    #[arg(short = 'u', long)]
    pub notify_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    pub file: PathBuf,

    #[arg(short = 'u', long)]
    pub notify_url: Option<String>,
}

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    EventLogger::init(&config.telemetry.log_level);

    match cli.command {
        Commands::Interfaces => print_interfaces(),
        Commands::Run(args) => {
            let interface = args
                .interface
                .unwrap_or_else(|| config.capture.interface.clone());
            let opener = PcapOpener {
                promiscuous: config.capture.promiscuous,
                snaplen: config.capture.snaplen,
                read_timeout_ms: config.capture.read_timeout_ms,
            };
            monitor(&config, Arc::new(opener), &interface, args.notify_url).await
        }
        Commands::Replay(args) => {
            let opener = PcapFileOpener::new(&args.file);
            let name = args.file.display().to_string();
            monitor(&config, Arc::new(opener), &name, args.notify_url).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FlowguardConfig> {
    let config = match path {
        Some(path) => FlowguardConfig::load_from_path(path),
        None => FlowguardConfig::load(),
    };
    config.context("loading configuration")
}

fn print_interfaces() -> anyhow::Result<()> {
    let interfaces = list_interfaces().context("listing capture interfaces")?;
    if interfaces.is_empty() {
        println!("no capture interfaces found");
    }
    for interface in interfaces {
        match interface.description {
            Some(description) => println!("{}\t{}", interface.name, description),
            None => println!("{}", interface.name),
        }
    }
    Ok(())
}

/// One pipeline run from start to shutdown.
#[instrument(skip(config, opener, notify_url))]
async fn monitor(
    config: &FlowguardConfig,
    opener: Arc<dyn SourceOpener>,
    interface: &str,
    notify_url: Option<String>,
) -> anyhow::Result<()> {
    let metrics = MetricsRecorder::new().context("registering metrics")?;
    let line_format: LineFormat = config.worker.protocol.line_format.parse()?;

    let host = WorkerHost::new(config.worker.clone());
    let worker = host.init().await.context("starting inference worker")?;
    let sink = Arc::new(CsvSink::spawn(&config.sink));

    let capture = config.capture.clone();
    let (pipeline, mut events) = Pipeline::new(
        worker,
        opener,
        Arc::clone(&sink),
        Arc::new(TerminalPresenter),
        metrics.clone(),
    );
    let pipeline = pipeline
        .with_line_format(line_format)
        .with_notify_timeout(Duration::from_millis(config.notify.timeout_ms))
        .with_verdict_grace(config.worker.shutdown.verdict_grace())
        .with_generator(Arc::new(move || -> Box<dyn FlowGenerator> {
            Box::new(BasicFlowGenerator::new(
                capture.flow_timeout_us(),
                capture.activity_timeout_us(),
            ))
        }));

    let notify_url = notify_url.or_else(|| config.notify.url.clone());
    pipeline.start(interface, notify_url.as_deref())?;

    let mut flows = FlowCounter::default();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PipelineEvent::Status(status)) => info!("{status}"),
                Some(PipelineEvent::Flow(flow)) => {
                    flows.increment();
                    debug!(flow = %flow.flow_id, flows = %flows, "flow archived");
                }
                Some(PipelineEvent::Verdict(verdict)) => debug!(%verdict, "verdict"),
                Some(PipelineEvent::Finished { .. }) | None => break,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!("interrupt received, stopping capture");
                pipeline.stop();
            }
        }
    }

    let outcome = pipeline.wait().await;
    host.shutdown().await;
    sink.close().await;

    info!(flows = flows.get(), "capture ended");
    match metrics.gather_metrics() {
        Ok(text) => debug!("metrics\n{text}"),
        Err(e) => warn!(error = %e, "could not gather metrics"),
    }

    match outcome {
        Some(RunOutcome::OpenFailed(reason)) => bail!(reason),
        Some(RunOutcome::Error(reason)) => bail!("capture failed: {reason}"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_interface_and_url() {
        let cli = Cli::try_parse_from([
            "flowguard",
            "run",
            "-i",
            "wlan0",
            "--notify-url",
            "http://127.0.0.1:9000/alerts",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.interface.as_deref(), Some("wlan0"));
                assert_eq!(
                    args.notify_url.as_deref(),
                    Some("http://127.0.0.1:9000/alerts")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["flowguard", "replay", "day1.pcap", "-c", "lab.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lab.yaml")));
        assert!(matches!(cli.command, Commands::Replay(ReplayArgs { ref file, .. }) if file == Path::new("day1.pcap")));
    }

    #[test]
    fn replay_requires_a_file() {
        assert!(Cli::try_parse_from(["flowguard", "replay"]).is_err());
    }
}
