use metrics::{counter, Counter};

use crate::router::PacketKind;

/// Ingestion telemetry.
///
/// `Telemetry` holds handles to the counters describing the ingestion pipeline itself: how many datagrams and bytes
/// were read, how many lines were rejected or dropped, and how many tasks faulted. The handles are registered once,
/// against whichever recorder is current when `Telemetry::new` is called, so that the hot path only ever increments
/// an existing atomic.
#[derive(Clone)]
pub struct Telemetry {
    metric_errors: Counter,
    event_errors: Counter,
    service_check_errors: Counter,
    metric_drops: Counter,
    event_drops: Counter,
    service_check_drops: Counter,
    datagrams: Counter,
    bytes: Counter,
    read_errors: Counter,
    task_faults: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance, registering its counters with the current recorder.
    pub fn new() -> Self {
        Self {
            metric_errors: counter!("ingest.packet.error_total", "packet_type" => PacketKind::Metric.as_str()),
            event_errors: counter!("ingest.packet.error_total", "packet_type" => PacketKind::Event.as_str()),
            service_check_errors: counter!(
                "ingest.packet.error_total",
                "packet_type" => PacketKind::ServiceCheck.as_str()
            ),
            metric_drops: counter!("ingest.packet.dropped_total", "packet_type" => PacketKind::Metric.as_str()),
            event_drops: counter!("ingest.packet.dropped_total", "packet_type" => PacketKind::Event.as_str()),
            service_check_drops: counter!(
                "ingest.packet.dropped_total",
                "packet_type" => PacketKind::ServiceCheck.as_str()
            ),
            datagrams: counter!("ingest.socket.datagrams_total"),
            bytes: counter!("ingest.socket.bytes_total"),
            read_errors: counter!("ingest.socket.read_error_total"),
            task_faults: counter!("ingest.task.fault_total"),
        }
    }

    /// Tracks a line that could not be parsed.
    pub fn track_parse_error(&self, kind: PacketKind) {
        match kind {
            PacketKind::Metric => self.metric_errors.increment(1),
            PacketKind::Event => self.event_errors.increment(1),
            PacketKind::ServiceCheck => self.service_check_errors.increment(1),
        }
    }

    /// Tracks a parsed value that could not be delivered because its destination worker is gone.
    pub fn track_dropped(&self, kind: PacketKind) {
        match kind {
            PacketKind::Metric => self.metric_drops.increment(1),
            PacketKind::Event => self.event_drops.increment(1),
            PacketKind::ServiceCheck => self.service_check_drops.increment(1),
        }
    }

    /// Tracks a datagram read from a socket.
    pub fn track_datagram(&self, bytes_len: usize) {
        self.datagrams.increment(1);
        self.bytes.increment(bytes_len as u64);
    }

    /// Tracks a failed socket read.
    pub fn track_read_error(&self) {
        self.read_errors.increment(1);
    }

    /// Tracks a task that faulted.
    pub fn track_task_fault(&self) {
        self.task_faults.increment(1);
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
