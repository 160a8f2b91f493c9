//! Callback subscribers.
//!
//! Each callback gets its own receiver and task, so a slow or panicking
//! callback never holds up delivery to the others or the stdout reader.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::supervisor::InferenceWorker;

/// A registered callback. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops delivery to the callback; same as dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl InferenceWorker {
    /// Invokes `callback` for every decoded label. Panics are caught and
    /// logged; the subscription stays active.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(label) => {
                        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(label))) {
                            error!(panic = panic_message(&*panic), "verdict subscriber panicked");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "verdict subscriber lagging, labels skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
