use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{bounded, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    plugin::{Flush, Plugin, PluginRegistry},
    pool::BufferPool,
    router::Router,
    socket::{bind_socket, SocketReader},
    supervisor::{spawn_supervised, CrashReporter},
    telemetry::Telemetry,
    worker::{Command, EventFlush, WorkerFlush},
};

/// Errors that could occur while starting a server.
#[derive(Debug, Error)]
pub enum StartError {
    /// The server was already started.
    #[error("server already started")]
    AlreadyStarted,

    /// A listening socket could not be bound.
    ///
    /// This is almost always an environmental problem, such as the address already being in use, and is not worth
    /// retrying.
    #[error("failed to bind UDP socket to {address}: {source}")]
    Bind {
        /// Address that the socket was being bound to.
        address: SocketAddr,

        /// Underlying error.
        source: io::Error,
    },

    /// Failed to spawn a reader thread.
    #[error("failed to spawn task '{task}': {source}")]
    Spawn {
        /// Name of the task.
        task: String,

        /// Underlying error.
        source: io::Error,
    },
}

pub(crate) struct ServerConfiguration {
    pub listen_addr: SocketAddr,
    pub recv_buffer_size: usize,
    pub readers: usize,
    pub reuse_port: bool,
    pub read_timeout: Duration,
}

/// Control side of a running worker.
pub(crate) struct WorkerHandle<T> {
    control_tx: Sender<Command<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T> WorkerHandle<T> {
    pub fn new(control_tx: Sender<Command<T>>, handle: JoinHandle<()>) -> Self {
        Self { control_tx, handle: Some(handle) }
    }

    /// Asks the worker for its state, waiting until it has drained its queue.
    ///
    /// Returns `None` if the worker has exited.
    fn flush(&self) -> Option<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.control_tx.send(Command::Flush(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }

    fn stop(&mut self) {
        let _ = self.control_tx.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A statsd ingestion server.
///
/// A `Server` is created by [`ServerBuilder`][crate::ServerBuilder], which spawns its workers. Calling
/// [`start`][Server::start] binds the listening sockets and spawns one reader per socket. From then on, every datagram
/// received is split into lines, and every line is parsed and routed to the worker that owns it.
///
/// Worker state is collected with [`flush`][Server::flush], which also hands the collected state to every registered
/// plugin. Dropping the server shuts it down.
pub struct Server {
    pub(crate) config: ServerConfiguration,
    pub(crate) router: Arc<Router>,
    pub(crate) pool: BufferPool,
    pub(crate) telemetry: Telemetry,
    pub(crate) crash_reporter: Arc<dyn CrashReporter>,
    pub(crate) workers: Vec<WorkerHandle<WorkerFlush>>,
    pub(crate) event_worker: WorkerHandle<EventFlush>,
    pub(crate) plugins: PluginRegistry,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) readers: Vec<JoinHandle<()>>,
    pub(crate) local_addr: Option<SocketAddr>,
}

impl Server {
    /// Binds the listening sockets and spawns the readers.
    ///
    /// Every socket is bound before any reader is spawned, so a bind failure leaves nothing running. When the listen
    /// address has a port of zero and several readers share the port, the first socket picks the port and the rest
    /// bind to it.
    ///
    /// Returns the address the sockets are bound to.
    ///
    /// # Errors
    ///
    /// If the server was already started, if a socket cannot be bound, or if a reader thread cannot be spawned, an
    /// error will be returned.
    pub fn start(&mut self) -> Result<SocketAddr, StartError> {
        if self.local_addr.is_some() {
            return Err(StartError::AlreadyStarted);
        }

        let mut sockets = Vec::with_capacity(self.config.readers);
        let mut address = self.config.listen_addr;
        for _ in 0..self.config.readers {
            let socket =
                bind_socket(address, self.config.recv_buffer_size, self.config.reuse_port, self.config.read_timeout)
                    .and_then(|socket| socket.local_addr().map(|addr| (socket, addr)));
            let (socket, bound) = socket.map_err(|source| StartError::Bind { address, source })?;

            address = bound;
            sockets.push(socket);
        }

        for (id, socket) in sockets.into_iter().enumerate() {
            let reader = SocketReader::new(
                id,
                socket,
                self.pool.clone(),
                Arc::clone(&self.router),
                self.telemetry.clone(),
                Arc::clone(&self.shutdown),
            );

            let task = format!("ingest-reader-{id}");
            let spawned =
                spawn_supervised(task.clone(), Arc::clone(&self.crash_reporter), self.telemetry.clone(), move || {
                    reader.run()
                });
            match spawned {
                Ok(handle) => self.readers.push(handle),
                Err(source) => {
                    // A failed start leaves no reader holding a socket.
                    self.stop_readers();
                    return Err(StartError::Spawn { task, source });
                }
            }
        }

        info!(
            address = %address,
            readers = self.readers.len(),
            workers = self.workers.len(),
            "Ingestion server started."
        );
        self.local_addr = Some(address);
        Ok(address)
    }

    /// Returns the address the server is listening on, or `None` if it has not been started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns the router that readers hand lines to.
    ///
    /// Lines can be injected directly through [`Router::handle_packet`], bypassing the sockets.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handles a single line as if it had been received by a reader.
    pub fn handle_packet(&self, packet: &[u8]) {
        self.router.handle_packet(packet);
    }

    /// Registers a plugin to be called on every subsequent flush.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.plugins.register(plugin);
    }

    /// Returns a snapshot of the registered plugins, in registration order.
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.snapshot()
    }

    /// Collects and resets the state of every worker, then hands it to every plugin.
    ///
    /// Each worker drains what is already queued for it before answering, so every line routed before this call is
    /// part of the result. Workers that have exited are skipped. Plugin errors are logged.
    pub fn flush(&self) -> Flush {
        let mut flush = Flush::default();

        for (id, worker) in self.workers.iter().enumerate() {
            match worker.flush() {
                Some(state) => flush.workers.push(state),
                None => warn!(worker = id, "Worker is not running, skipping flush."),
            }
        }

        match self.event_worker.flush() {
            Some(events) => flush.events = events,
            None => warn!("Event worker is not running, skipping flush."),
        }

        for plugin in self.plugins.snapshot() {
            if let Err(e) = plugin.flush(&flush) {
                error!(plugin = plugin.name(), error = %e, "Plugin failed to flush.");
            }
        }

        flush
    }

    /// Stops every running reader and waits for it to exit, leaving the workers running.
    fn stop_readers(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }
        self.shutdown.store(false, Ordering::Release);
    }

    /// Stops the server.
    ///
    /// Readers finish the datagram they are handling and exit within one read timeout. Workers then drain their
    /// queues and exit. Anything not yet flushed is discarded.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        for handle in self.readers.drain(..) {
            let _ = handle.join();
        }

        for worker in &mut self.workers {
            worker.stop();
        }
        self.event_worker.stop();

        debug!("Ingestion server stopped.");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
