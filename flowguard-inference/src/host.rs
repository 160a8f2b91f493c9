//! Explicit owner of the single inference worker.
//!
//! Consumers receive the worker by `Arc` from [`WorkerHost::init`]; there is no
//! ambient global. `init` is idempotent while an instance exists, `shutdown`
//! tears it down and clears the slot so the next `init` starts afresh.

use std::sync::Arc;

use flowguard_config::WorkerConfig;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::WorkerError;
use crate::supervisor::{InferenceWorker, WorkerState};

#[derive(Debug)]
pub struct WorkerHost {
    config: WorkerConfig,
    slot: Mutex<Option<Arc<InferenceWorker>>>,
}

impl WorkerHost {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Returns the existing worker, or spawns one.
    pub async fn init(&self) -> Result<Arc<InferenceWorker>, WorkerError> {
        let mut slot = self.slot.lock().await;
        if let Some(worker) = slot.as_ref() {
            debug!("inference worker already initialized");
            return Ok(Arc::clone(worker));
        }
        let worker = Arc::new(InferenceWorker::spawn(&self.config).await?);
        *slot = Some(Arc::clone(&worker));
        Ok(worker)
    }

    pub async fn get(&self) -> Option<Arc<InferenceWorker>> {
        self.slot.lock().await.clone()
    }

    /// Shuts the worker down and releases it. `false` if there was nothing to
    /// tear down.
    pub async fn shutdown(&self) -> bool {
        let worker = self.slot.lock().await.take();
        match worker {
            Some(worker) => worker.graceful_shutdown().await,
            None => false,
        }
    }

    pub async fn state(&self) -> WorkerState {
        match self.slot.lock().await.as_ref() {
            Some(worker) => worker.state(),
            None => WorkerState::NotStarted,
        }
    }
}
