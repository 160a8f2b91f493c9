//! Daily CSV archive of every flow.
//!
//! All appends go through one writer task, so rows from concurrent runs never
//! interleave. The file for a row is picked when the row is written:
//! `<directory>/<YYYY-MM-DD><suffix>`, local date. A header is written when
//! the file is new or empty.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use flowguard_config::SinkConfig;
use flowguard_core::FlowRecord;
use parking_lot::Mutex;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug)]
pub struct CsvSink {
    directory: PathBuf,
    suffix: String,
    tx: Mutex<Option<mpsc::UnboundedSender<FlowRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl CsvSink {
    /// Starts the writer task. Must be called within a tokio runtime.
    pub fn spawn(config: &SinkConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_rows(
            rx,
            config.directory.clone(),
            config.file_suffix.clone(),
        ));
        Self {
            directory: config.directory.clone(),
            suffix: config.file_suffix.clone(),
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Queues one row. `false` once the sink is closed.
    pub fn append(&self, flow: FlowRecord) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(flow).is_ok(),
            None => false,
        }
    }

    /// Stops accepting rows and waits for the queued ones to be written.
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!(error = %e, "csv writer task failed");
            }
        }
    }

    /// Today's file.
    pub fn current_path(&self) -> PathBuf {
        daily_path(&self.directory, &self.suffix)
    }
}

fn daily_path(directory: &Path, suffix: &str) -> PathBuf {
    directory.join(format!("{}{suffix}", Local::now().format("%Y-%m-%d")))
}

async fn write_rows(
    mut rx: mpsc::UnboundedReceiver<FlowRecord>,
    directory: PathBuf,
    suffix: String,
) {
    while let Some(flow) = rx.recv().await {
        let path = daily_path(&directory, &suffix);
        if let Err(e) = append_row(&path, &flow).await {
            error!(path = %path.display(), error = %e, "failed to append flow row");
        }
    }
    debug!("csv sink closed");
}

async fn append_row(path: &Path, flow: &FlowRecord) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut out = String::new();
    if file.metadata().await?.len() == 0 {
        out.push_str(FlowRecord::csv_header());
        out.push('\n');
    }
    out.push_str(&flow.csv_row());
    out.push('\n');

    file.write_all(out.as_bytes()).await?;
    file.flush().await
}
