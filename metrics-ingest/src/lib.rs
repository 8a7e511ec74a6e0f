//! Ingestion and dispatch pipeline for [statsd]-style metrics, events, and service checks received over UDP.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use metrics_ingest::{LoggingPlugin, ServerBuilder};
//! // First, create a builder.
//! //
//! // The builder can configure the listen address, how many sockets and workers to run, how large the buffers and
//! // queues are, and which parser, crash reporter and plugins to use.
//! let mut server = ServerBuilder::default()
//!     .with_listen_address("0.0.0.0:8126")
//!     .expect("failed to resolve listen address")
//!     .with_workers(4)
//!     .with_plugin(Arc::new(LoggingPlugin))
//!     .build()
//!     .expect("failed to build server");
//!
//! // Building spawns the workers, but no socket is bound until the server is started.
//! server.start().expect("failed to bind");
//!
//! // Periodically collect what the workers have aggregated. Every registered plugin sees each flush.
//! loop {
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     let flush = server.flush();
//!     println!("flushed {} metrics", flush.metric_count());
//! }
//! ```
//!
//! # Design
//!
//! ## Readers
//!
//! Each listening socket is owned by one reader thread. A reader checks a buffer out of a shared pool, reads one
//! datagram into it, splits it on newlines, and hands every line to the router before the buffer goes back to the
//! pool. With port reuse enabled, several readers can bind the same address and the kernel balances datagrams across
//! them.
//!
//! ## Routing
//!
//! Lines are classified by prefix: `_e{` for events, `_sc` for service checks, and anything else is a metric. Metrics
//! are sent to the worker selected by their digest, which is computed from the metric name, type and tags, so the same
//! metric always lands on the same worker. Events and service checks all go to a single event worker.
//!
//! A line that fails to parse is logged, counted, and dropped; it never stops the reader.
//!
//! ## Backpressure
//!
//! Worker queues are bounded by default. When a worker falls behind, readers block when sending to it, leaving
//! datagrams in the kernel's receive buffer rather than growing memory without limit.
//!
//! ## Fault isolation
//!
//! Every reader and worker runs under a supervisor that catches panics at the task root and reports them to a
//! [`CrashReporter`]. A faulted task exits without taking the rest of the process with it.
//!
//! ## Telemetry
//!
//! The pipeline records its own telemetry through [`metrics`]: datagrams and bytes read, read errors, lines rejected
//! or dropped by type, and task faults. All of it is under the `ingest` namespace.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, ServerBuilder};

mod parser;
pub use self::parser::{
    AlertType, Event, Metric, MetricKey, MetricType, MetricValue, ParseError, Parser, Priority, ServiceCheck,
    ServiceCheckStatus, StatsdParser,
};

mod plugin;
pub use self::plugin::{Flush, LoggingPlugin, Plugin, PluginError, PluginRegistry};

mod pool;
pub use self::pool::{BufferPool, PooledBuffer};

mod router;
pub use self::router::{shard_for, PacketKind, Router};

mod server;
pub use self::server::{Server, StartError};

mod socket;

mod split;
pub use self::split::SplitBytes;

mod supervisor;
pub use self::supervisor::{spawn_supervised, CrashReporter, Fault, LogCrashReporter};

mod telemetry;
pub use self::telemetry::Telemetry;

mod worker;
pub use self::worker::{Aggregate, EventFlush, WorkerFlush};
