use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::error;

use crate::{
    parser::{Event, Metric, ParseError, Parser, ServiceCheck},
    telemetry::Telemetry,
};

const EVENT_PREFIX: &[u8] = b"_e{";
const SERVICE_CHECK_PREFIX: &[u8] = b"_sc";

/// Kind of line, as decided by its prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    /// A metric line: anything without a recognized prefix.
    Metric,

    /// An event line, prefixed by `_e{`.
    Event,

    /// A service check line, prefixed by `_sc`.
    ServiceCheck,
}

impl PacketKind {
    /// Classifies a line by its prefix.
    pub fn classify(packet: &[u8]) -> Self {
        if packet.starts_with(EVENT_PREFIX) {
            PacketKind::Event
        } else if packet.starts_with(SERVICE_CHECK_PREFIX) {
            PacketKind::ServiceCheck
        } else {
            PacketKind::Metric
        }
    }

    /// Returns the name of this kind, as used in telemetry tags.
    pub const fn as_str(self) -> &'static str {
        match self {
            PacketKind::Metric => "metric",
            PacketKind::Event => "event",
            PacketKind::ServiceCheck => "service_check",
        }
    }
}

/// Returns the index of the worker that owns the given digest.
///
/// For a fixed worker count, the same digest always maps to the same worker.
///
/// # Panics
///
/// Panics if `worker_count` is zero.
#[inline]
pub fn shard_for(digest: u64, worker_count: usize) -> usize {
    (digest % worker_count as u64) as usize
}

/// Classifies lines, parses them, and routes the results to their destination worker.
///
/// Metrics are sharded across the metric workers by their digest, while events and service checks all go to the single
/// event worker.
pub struct Router {
    parser: Arc<dyn Parser>,
    metric_txs: Vec<Sender<Metric>>,
    event_tx: Sender<Event>,
    service_check_tx: Sender<ServiceCheck>,
    telemetry: Telemetry,
}

impl Router {
    /// Creates a new `Router`.
    ///
    /// # Panics
    ///
    /// Panics if `metric_txs` is empty.
    pub fn new(
        parser: Arc<dyn Parser>,
        metric_txs: Vec<Sender<Metric>>,
        event_tx: Sender<Event>,
        service_check_tx: Sender<ServiceCheck>,
        telemetry: Telemetry,
    ) -> Self {
        assert!(!metric_txs.is_empty(), "router requires at least one metric worker");

        Self { parser, metric_txs, event_tx, service_check_tx, telemetry }
    }

    /// Returns the number of metric workers this router shards across.
    pub fn worker_count(&self) -> usize {
        self.metric_txs.len()
    }

    /// Handles a single line.
    ///
    /// Empty lines are ignored. Lines that fail to parse are logged, counted, and dropped. Everything else is sent to
    /// its destination worker, blocking if that worker's queue is full.
    pub fn handle_packet(&self, packet: &[u8]) {
        // This is called for every line of every datagram, so keep it lean: any slowdown here means the kernel's
        // receive queue fills up and datagrams get dropped.

        if packet.is_empty() {
            // Plenty of clients send a trailing newline, which leaves us with an empty final chunk.
            return;
        }

        let kind = PacketKind::classify(packet);
        let delivered = match kind {
            PacketKind::Event => match self.parser.parse_event(packet) {
                Ok(event) => self.event_tx.send(event).is_ok(),
                Err(e) => return self.reject(kind, packet, &e),
            },
            PacketKind::ServiceCheck => match self.parser.parse_service_check(packet) {
                Ok(check) => self.service_check_tx.send(check).is_ok(),
                Err(e) => return self.reject(kind, packet, &e),
            },
            PacketKind::Metric => match self.parser.parse_metric(packet) {
                Ok(metric) => {
                    let idx = shard_for(metric.digest, self.metric_txs.len());
                    self.metric_txs[idx].send(metric).is_ok()
                }
                Err(e) => return self.reject(kind, packet, &e),
            },
        };

        if !delivered {
            // The receiving worker has exited, most likely after a fault.
            self.telemetry.track_dropped(kind);
        }
    }

    fn reject(&self, kind: PacketKind, packet: &[u8], e: &ParseError) {
        error!(
            error = %e,
            packet = %String::from_utf8_lossy(packet),
            packet_type = kind.as_str(),
            "Could not parse packet."
        );
        self.telemetry.track_parse_error(kind);
    }
}
