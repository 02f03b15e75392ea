//! Background task supervision
//!
//! Handlers acknowledge a delivery before the work is done. The work is
//! handed to the supervisor, which owns it until it finishes and lets
//! shutdown wait for it instead of dropping it.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    stopping: CancellationToken,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` to completion, logging its failure
    pub fn spawn<F>(&self, name: &str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.to_string();
        self.tracker.spawn(async move {
            if let Err(e) = task.await {
                error!("Task {} failed: {:#}", name, e);
            }
        });
    }

    /// Cancelled when shutdown begins; long-running loops stop on it
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for what is running. `false` when the
    /// timeout passed with tasks still running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.stopping.cancel();
        self.tracker.close();
        info!("Draining {} background tasks", self.tracker.len());
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!("{} background tasks still running after {:?}", self.tracker.len(), timeout);
                false
            }
        }
    }
}
