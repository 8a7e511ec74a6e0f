use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, error};

use crate::telemetry::Telemetry;

/// A fault captured at a task boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Name of the task that faulted.
    pub task: String,

    /// Fault message, as extracted from the panic payload.
    pub message: String,
}

impl Fault {
    fn from_panic(task: &str, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };

        Self { task: task.to_owned(), message }
    }
}

/// Receives faults captured by supervised tasks.
pub trait CrashReporter: Send + Sync {
    /// Reports a fault.
    fn report(&self, fault: &Fault);
}

/// A [`CrashReporter`] that logs every fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogCrashReporter;

impl CrashReporter for LogCrashReporter {
    fn report(&self, fault: &Fault) {
        error!(task = %fault.task, message = %fault.message, "Task faulted and has exited.");
    }
}

/// Spawns a named task whose body is isolated from the rest of the process.
///
/// If `body` panics, the panic is caught at the task root, turned into a [`Fault`], counted, and handed to `reporter`.
/// The task then ends without affecting its siblings.
///
/// # Errors
///
/// If the underlying thread cannot be spawned, an error is returned.
pub fn spawn_supervised<F>(
    name: String,
    reporter: Arc<dyn CrashReporter>,
    telemetry: Telemetry,
    body: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.clone()).spawn(move || {
        debug!(task = %name, "Task started.");
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(()) => debug!(task = %name, "Task exited."),
            Err(payload) => {
                telemetry.track_task_fault();
                reporter.report(&Fault::from_panic(&name, payload.as_ref()));
            }
        }
    })
}
