use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs as _},
    num::NonZeroUsize,
    sync::{atomic::AtomicBool, Arc},
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    parser::{Parser, StatsdParser},
    plugin::{Plugin, PluginRegistry},
    pool::BufferPool,
    router::Router,
    server::{Server, ServerConfiguration, WorkerHandle},
    supervisor::{spawn_supervised, CrashReporter, LogCrashReporter},
    telemetry::Telemetry,
    worker::{EventWorker, Worker},
};

const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8126));
const DEFAULT_RECV_BUFFER_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_BUFFER_SIZE: usize = 8192;
const DEFAULT_READERS: usize = 1;
const DEFAULT_QUEUE_SIZE: usize = 4096;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors that could occur while building a server.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to resolve the listen address.
    #[error("invalid listen address: {reason}")]
    InvalidListenAddress {
        /// Details about the resolution failure.
        reason: String,
    },

    /// The worker count was zero.
    #[error("at least one worker is required")]
    NoWorkers,

    /// The reader count was zero.
    #[error("at least one reader is required")]
    NoReaders,

    /// Several readers were requested without port reuse, so only one of them could bind.
    #[error("{readers} readers require port reuse to be enabled")]
    PortReuseRequired {
        /// Number of readers requested.
        readers: usize,
    },

    /// The datagram buffer size was zero.
    #[error("datagram buffer size must be non-zero")]
    InvalidBufferSize,

    /// Failed to spawn a worker thread.
    #[error("failed to spawn task '{task}': {source}")]
    Spawn {
        /// Name of the task.
        task: String,

        /// Underlying error.
        source: io::Error,
    },
}

/// Builder for an ingestion [`Server`].
pub struct ServerBuilder {
    listen_addr: SocketAddr,
    recv_buffer_size: usize,
    buffer_size: usize,
    workers: usize,
    readers: usize,
    reuse_port: bool,
    queue_size: Option<usize>,
    read_timeout: Duration,
    parser: Arc<dyn Parser>,
    crash_reporter: Arc<dyn CrashReporter>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ServerBuilder {
    /// Set the address to listen on.
    ///
    /// The address must be in the format of `<host>:<port>`. When the host resolves to several addresses, the first one
    /// is used. A port of zero asks the operating system for an ephemeral port, which can be read back from
    /// [`Server::local_addr`] once started.
    ///
    /// Defaults to `127.0.0.1:8126`.
    ///
    /// # Errors
    ///
    /// If the given address cannot be resolved, an error will be returned indicating the reason.
    pub fn with_listen_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        let addr = addr.as_ref();
        self.listen_addr = addr
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidListenAddress { reason: format!("{addr}: {e}") })?
            .next()
            .ok_or_else(|| BuildError::InvalidListenAddress {
                reason: format!("{addr}: no addresses found"),
            })?;
        Ok(self)
    }

    /// Set the size of the kernel receive buffer requested for each socket.
    ///
    /// This is best-effort: the operating system may cap it, in which case a warning is logged and the socket is used
    /// anyway.
    ///
    /// Defaults to 2 MiB.
    #[must_use]
    pub fn with_recv_buffer_size(mut self, recv_buffer_size: usize) -> Self {
        self.recv_buffer_size = recv_buffer_size;
        self
    }

    /// Set the size of the buffers that datagrams are read into.
    ///
    /// Datagrams larger than this are truncated by the operating system.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the number of metric workers.
    ///
    /// Each worker owns a disjoint shard of the metric key space. The count is fixed for the life of the server.
    ///
    /// Defaults to the available parallelism of the host.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the number of socket readers.
    ///
    /// Each reader owns its own socket. More than one reader requires port reuse, so that every socket can bind the
    /// same address and the kernel can balance datagrams across them.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn with_readers(mut self, readers: usize) -> Self {
        self.readers = readers;
        self
    }

    /// Sets whether or not to enable port reuse on the listening sockets.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    /// Set the capacity of each worker's queue.
    ///
    /// When a worker's queue is full, readers routing to that worker block until it catches up, which in turn lets the
    /// kernel receive buffer absorb the burst. `None` makes every queue unbounded.
    ///
    /// Defaults to 4096.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: Option<usize>) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the socket read timeout.
    ///
    /// Readers check for shutdown between reads, so this bounds how long shutdown waits on an idle socket.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Set the parser used for every line.
    ///
    /// Defaults to [`StatsdParser`].
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    /// Set the crash reporter that faulted tasks are reported to.
    ///
    /// Defaults to [`LogCrashReporter`].
    #[must_use]
    pub fn with_crash_reporter(mut self, crash_reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = crash_reporter;
        self
    }

    /// Registers a plugin to be called on every flush.
    ///
    /// Plugins are called in registration order. More can be registered later with [`Server::register_plugin`].
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Builds the server.
    ///
    /// The metric workers and the event worker are spawned immediately. Self-telemetry is registered against the
    /// recorder that is current at the time of the call. No socket is bound until [`Server::start`] is called.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or if a worker thread cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<Server, BuildError> {
        if self.workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        if self.readers == 0 {
            return Err(BuildError::NoReaders);
        }
        if self.readers > 1 && !self.reuse_port {
            return Err(BuildError::PortReuseRequired { readers: self.readers });
        }
        if self.buffer_size == 0 {
            return Err(BuildError::InvalidBufferSize);
        }

        info!(version = env!("CARGO_PKG_VERSION"), "Building ingestion server.");
        debug!(
            listen_address = %self.listen_addr,
            workers = self.workers,
            readers = self.readers,
            reuse_port = self.reuse_port,
            recv_buffer_size = self.recv_buffer_size,
            buffer_size = self.buffer_size,
            queue_size = ?self.queue_size,
            read_timeout = ?self.read_timeout,
            plugins = self.plugins.len(),
            "Ingestion server configuration."
        );

        let telemetry = Telemetry::new();

        let mut workers = Vec::with_capacity(self.workers);
        let mut metric_txs = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let (metrics_tx, metrics_rx) = self.queue();
            let (control_tx, control_rx) = unbounded();
            let worker = Worker::new(id, metrics_rx, control_rx);

            let task = format!("ingest-worker-{id}");
            let handle = spawn_supervised(task.clone(), Arc::clone(&self.crash_reporter), telemetry.clone(), move || {
                worker.run()
            })
            .map_err(|source| BuildError::Spawn { task, source })?;

            metric_txs.push(metrics_tx);
            workers.push(WorkerHandle::new(control_tx, handle));
        }

        let (event_tx, events_rx) = self.queue();
        let (service_check_tx, service_checks_rx) = self.queue();
        let (control_tx, control_rx) = unbounded();
        let event_worker = EventWorker::new(events_rx, service_checks_rx, control_rx);

        let task = "ingest-event-worker".to_owned();
        let handle = spawn_supervised(task.clone(), Arc::clone(&self.crash_reporter), telemetry.clone(), move || {
            event_worker.run()
        })
        .map_err(|source| BuildError::Spawn { task, source })?;
        let event_worker = WorkerHandle::new(control_tx, handle);

        let router = Arc::new(Router::new(self.parser, metric_txs, event_tx, service_check_tx, telemetry.clone()));

        let plugins = PluginRegistry::new();
        for plugin in self.plugins {
            plugins.register(plugin);
        }

        let config = ServerConfiguration {
            listen_addr: self.listen_addr,
            recv_buffer_size: self.recv_buffer_size,
            readers: self.readers,
            reuse_port: self.reuse_port,
            read_timeout: self.read_timeout,
        };

        Ok(Server {
            config,
            router,
            pool: BufferPool::new(self.buffer_size),
            telemetry,
            crash_reporter: self.crash_reporter,
            workers,
            event_worker,
            plugins,
            shutdown: Arc::new(AtomicBool::new(false)),
            readers: Vec::new(),
            local_addr: None,
        })
    }

    fn queue<T>(&self) -> (Sender<T>, Receiver<T>) {
        match self.queue_size {
            Some(size) => bounded(size),
            None => unbounded(),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            listen_addr: DEFAULT_LISTEN_ADDRESS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            readers: DEFAULT_READERS,
            reuse_port: false,
            queue_size: Some(DEFAULT_QUEUE_SIZE),
            read_timeout: DEFAULT_READ_TIMEOUT,
            parser: Arc::new(StatsdParser),
            crash_reporter: Arc::new(LogCrashReporter),
            plugins: Vec::new(),
        }
    }
}
