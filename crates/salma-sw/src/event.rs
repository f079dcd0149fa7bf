//! Lifetime extension for background work started by an event.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::ServiceWorkerError;

/// Counts of background tasks once an event has settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Keeps background work of one event alive.
///
/// Work registered with [`ExtendableEvent::wait_until`] runs detached from the
/// response path. Failures are logged when they happen and never propagate.
/// Dropping the event without awaiting [`ExtendableEvent::settled`] aborts
/// whatever is still in flight.
#[derive(Debug)]
pub struct ExtendableEvent {
    label: &'static str,
    tasks: Mutex<JoinSet<bool>>,
}

impl ExtendableEvent {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Event label used in log fields.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Register background work. Must be called from within a tokio runtime.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        let label = self.label;
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spawn(async move {
                match task.await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(event = label, error = %e, "Background task failed");
                        false
                    }
                }
            });
    }

    /// Number of registered tasks not yet collected.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every registered task to finish.
    pub async fn settled(self) -> SettleReport {
        let label = self.label;
        let mut tasks = self
            .tasks
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut report = SettleReport::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.completed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    // Marked handled here; a task panic never reaches the host.
                    error!(event = label, error = %e, "Unhandled failure in background task");
                    report.panicked += 1;
                }
            }
        }
        report
    }
}
