use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::worker::{EventFlush, WorkerFlush};

/// Everything collected over one flush interval.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flush {
    /// One entry per metric worker that answered the flush request, in worker order.
    pub workers: Vec<WorkerFlush>,

    /// Events and service checks from the event worker.
    pub events: EventFlush,
}

impl Flush {
    /// Returns the total number of distinct metric keys across all workers.
    pub fn metric_count(&self) -> usize {
        self.workers.iter().map(|w| w.metrics.len()).sum()
    }
}

/// Error returned by a plugin that failed to handle a flush.
#[derive(Debug, Error)]
#[error("plugin '{plugin}' failed: {reason}")]
pub struct PluginError {
    /// Name of the plugin.
    pub plugin: String,

    /// Details about the failure.
    pub reason: String,
}

/// A collaborator invoked at flush time, such as an archiver.
pub trait Plugin: Send + Sync {
    /// Returns the name of the plugin, used in logs.
    fn name(&self) -> &str;

    /// Handles the data collected over one flush interval.
    ///
    /// # Errors
    ///
    /// If the plugin fails to handle the flush, an error is returned. The caller logs it and moves on.
    fn flush(&self, flush: &Flush) -> Result<(), PluginError>;
}

/// Ordered, thread-safe list of registered plugins.
///
/// Registration appends under a lock. Readers take a snapshot, which is a shallow copy of the list made under the same
/// lock, so iterating over it at flush time never races with a concurrent registration.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Mutex<Vec<Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Creates an empty `PluginRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin, after every plugin registered so far.
    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.lock().push(plugin);
    }

    /// Returns a copy of the currently registered plugins, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.lock().clone()
    }
}

/// A plugin that logs a summary of each flush.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn flush(&self, flush: &Flush) -> Result<(), PluginError> {
        let processed: u64 = flush.workers.iter().map(|w| w.processed).sum();
        info!(
            workers = flush.workers.len(),
            metrics = flush.metric_count(),
            processed,
            events = flush.events.events.len(),
            service_checks = flush.events.service_checks.len(),
            "Flushed."
        );
        Ok(())
    }
}
