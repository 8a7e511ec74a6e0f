use std::{
    collections::HashMap,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use metrics_ingest::{
    shard_for, Aggregate, BuildError, Flush, MetricType, Parser as _, Plugin, PluginError, Server, ServerBuilder,
    ServiceCheckStatus, StartError, StatsdParser,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use parking_lot::Mutex;

const WORKERS: usize = 4;
const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CapturingPlugin {
    flushes: Mutex<Vec<Flush>>,
}

impl Plugin for CapturingPlugin {
    fn name(&self) -> &str {
        "capturing"
    }

    fn flush(&self, flush: &Flush) -> Result<(), PluginError> {
        self.flushes.lock().push(flush.clone());
        Ok(())
    }
}

struct FailingPlugin;

impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    fn flush(&self, _flush: &Flush) -> Result<(), PluginError> {
        Err(PluginError { plugin: self.name().to_owned(), reason: "bucket unavailable".to_owned() })
    }
}

struct Harness {
    server: Server,
    addr: SocketAddr,
    client: UdpSocket,
    capture: Arc<CapturingPlugin>,
    snapshotter: Snapshotter,
    totals: Mutex<HashMap<String, u64>>,
}

impl Harness {
    fn start() -> Self {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let capture = Arc::new(CapturingPlugin::default());

        let mut server = metrics::with_local_recorder(&recorder, || {
            ServerBuilder::default()
                .with_listen_address("127.0.0.1:0")
                .expect("should resolve")
                .with_workers(WORKERS)
                .with_read_timeout(Duration::from_millis(20))
                .with_plugin(Arc::new(FailingPlugin))
                .with_plugin(capture.clone())
                .build()
                .expect("should build")
        });
        let addr = server.start().expect("should start");

        let client = UdpSocket::bind("127.0.0.1:0").expect("client should bind");
        Self { server, addr, client, capture, snapshotter, totals: Mutex::default() }
    }

    fn send(&self, payload: &[u8]) {
        self.client.send_to(payload, self.addr).expect("should send");
    }

    /// Returns the running total of every counter named `name`, across all labels.
    ///
    /// Taking a snapshot resets the recorder's counters, so every snapshot is folded into `totals` first.
    fn counter(&self, name: &str) -> u64 {
        let mut totals = self.totals.lock();
        for (ckey, _, _, value) in self.snapshotter.snapshot().into_vec() {
            if let DebugValue::Counter(delta) = value {
                *totals.entry(ckey.key().name().to_owned()).or_default() += delta;
            }
        }
        totals.get(name).copied().unwrap_or(0)
    }

    /// Waits until the server has read `datagrams` datagrams in total.
    fn wait_for_datagrams(&self, datagrams: u64) {
        let deadline = Instant::now() + WAIT;
        while self.counter("ingest.socket.datagrams_total") < datagrams {
            assert!(Instant::now() < deadline, "timed out waiting for {datagrams} datagrams");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

#[test]
fn metrics_are_split_and_sharded() {
    let harness = Harness::start();
    harness.send(b"foo:1|c\nbar:2|g");
    harness.wait_for_datagrams(1);

    let flush = harness.server.flush();
    assert_eq!(flush.workers.len(), WORKERS);
    assert_eq!(flush.metric_count(), 2);

    for (line, name) in [(&b"foo:1|c"[..], "foo"), (&b"bar:2|g"[..], "bar")] {
        let digest = StatsdParser.parse_metric(line).expect("should parse").digest;
        let owner = shard_for(digest, WORKERS);

        for worker in &flush.workers {
            let present = worker.metrics.keys().any(|k| k.name == name);
            assert_eq!(present, worker.worker == owner, "metric {name} found on the wrong worker");
        }
    }

    let foo = flush.workers.iter().flat_map(|w| w.metrics.iter()).find(|(k, _)| k.name == "foo");
    let (key, value) = foo.expect("foo should be flushed");
    assert_eq!(key.metric_type, MetricType::Counter);
    assert_eq!(*value, Aggregate::Counter(1.0));

    assert_eq!(harness.counter("ingest.packet.error_total"), 0);
}

#[test]
fn empty_lines_are_ignored() {
    let harness = Harness::start();
    harness.send(b"\n");
    harness.send(b"foo:1|c\n\n");
    harness.wait_for_datagrams(2);

    let flush = harness.server.flush();
    assert_eq!(flush.metric_count(), 1);
    assert_eq!(harness.counter("ingest.packet.error_total"), 0);
}

#[test]
fn malformed_lines_do_not_stop_the_stream() {
    let harness = Harness::start();
    harness.send(b"garbage\nfoo:1|c\n_e{bad}:x\n_sc|db|7\nbar:1|c");
    harness.wait_for_datagrams(1);

    let flush = harness.server.flush();
    assert_eq!(flush.metric_count(), 2);
    assert_eq!(harness.counter("ingest.packet.error_total"), 3);
}

#[test]
fn events_and_service_checks_reach_the_event_worker() {
    let harness = Harness::start();
    harness.send(b"_e{5,4}:title|text|#env:prod\n_sc|db.up|2|m:down");
    harness.wait_for_datagrams(1);

    let flush = harness.server.flush();
    assert_eq!(flush.metric_count(), 0);

    assert_eq!(flush.events.events.len(), 1);
    assert_eq!(flush.events.events[0].title, "title");
    assert_eq!(flush.events.events[0].tags, vec!["env:prod"]);

    assert_eq!(flush.events.service_checks.len(), 1);
    assert_eq!(flush.events.service_checks[0].status, ServiceCheckStatus::Critical);
    assert_eq!(flush.events.service_checks[0].message.as_deref(), Some("down"));
}

#[test]
fn plugins_see_every_flush_despite_earlier_failures() {
    let harness = Harness::start();
    harness.send(b"foo:1|c");
    harness.wait_for_datagrams(1);

    let first = harness.server.flush();
    let second = harness.server.flush();

    let flushes = harness.capture.flushes.lock();
    assert_eq!(*flushes, vec![first, second]);
    assert_eq!(flushes[0].metric_count(), 1);
    assert_eq!(flushes[1].metric_count(), 0);

    let names = harness.server.plugins().iter().map(|p| p.name().to_owned()).collect::<Vec<_>>();
    assert_eq!(names, vec!["failing", "capturing"]);
}

#[test]
fn datagram_and_byte_counters_are_tracked() {
    let harness = Harness::start();
    harness.send(b"foo:1|c");
    harness.send(b"bar:22|g");
    harness.wait_for_datagrams(2);

    assert_eq!(harness.counter("ingest.socket.bytes_total"), 15);
    assert_eq!(harness.counter("ingest.socket.read_error_total"), 0);

    // Totals are cumulative across reads.
    harness.send(b"baz:1|c");
    harness.wait_for_datagrams(3);
    assert_eq!(harness.counter("ingest.socket.bytes_total"), 22);
    assert_eq!(harness.counter("ingest.socket.datagrams_total"), 3);
}

#[test]
fn bind_conflict_is_fatal_to_start() {
    let occupied = UdpSocket::bind("127.0.0.1:0").expect("should bind");
    let addr = occupied.local_addr().expect("should have local address");

    let mut server = ServerBuilder::default()
        .with_listen_address(addr.to_string())
        .expect("should resolve")
        .with_workers(1)
        .build()
        .expect("should build");

    match server.start() {
        Err(StartError::Bind { address, .. }) => assert_eq!(address, addr),
        other => panic!("expected bind error, got {other:?}"),
    }
    assert!(server.local_addr().is_none());
}

#[test]
fn start_twice_is_rejected() {
    let mut harness = Harness::start();
    assert!(matches!(harness.server.start(), Err(StartError::AlreadyStarted)));
    harness.server.shutdown();
}

#[test]
fn multiple_readers_require_port_reuse() {
    let result = ServerBuilder::default().with_readers(2).build();
    assert!(matches!(result, Err(BuildError::PortReuseRequired { readers: 2 })));
}

#[cfg(target_os = "linux")]
#[test]
fn readers_share_an_ephemeral_port_with_reuse() {
    let mut server = ServerBuilder::default()
        .with_listen_address("127.0.0.1:0")
        .expect("should resolve")
        .with_workers(2)
        .with_readers(3)
        .with_reuse_port(true)
        .with_read_timeout(Duration::from_millis(20))
        .build()
        .expect("should build");
    let addr = server.start().expect("should start");
    assert_ne!(addr.port(), 0);

    let client = UdpSocket::bind("127.0.0.1:0").expect("client should bind");
    client.send_to(b"foo:1|c", addr).expect("should send");

    let deadline = Instant::now() + WAIT;
    let mut total = 0;
    while total == 0 {
        assert!(Instant::now() < deadline, "timed out waiting for metric");
        total += server.flush().metric_count();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(total, 1);

    server.shutdown();
}

#[test]
fn shutdown_stops_readers_and_workers() {
    let mut harness = Harness::start();
    harness.send(b"foo:1|c");
    harness.wait_for_datagrams(1);

    let started = Instant::now();
    harness.server.shutdown();
    assert!(started.elapsed() < WAIT);

    // Workers are gone, so a flush collects nothing.
    let flush = harness.server.flush();
    assert!(flush.workers.is_empty());
}
