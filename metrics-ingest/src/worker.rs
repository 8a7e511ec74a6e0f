use std::collections::{hash_map::Entry, HashMap, HashSet};

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, trace};

use crate::parser::{Event, Metric, MetricKey, MetricType, MetricValue, ServiceCheck};

/// Control messages for a running worker.
pub(crate) enum Command<T> {
    /// Drain everything queued so far, then send the worker's state back and reset it.
    Flush(Sender<T>),

    /// Drain everything queued so far, then exit.
    Stop,
}

/// Aggregated state for a single metric key over one flush interval.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    /// Sum of all counter increments, each scaled by its sample rate.
    Counter(f64),

    /// Last gauge value received.
    Gauge(f64),

    /// Summary of histogram, timer, and distribution samples.
    Samples {
        /// Number of samples, scaled by their sample rates.
        count: f64,

        /// Sum of all sample values.
        sum: f64,

        /// Smallest sample value.
        min: f64,

        /// Largest sample value.
        max: f64,
    },

    /// Distinct set members.
    Set(HashSet<String>),
}

impl Aggregate {
    fn new(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Counter => Aggregate::Counter(0.0),
            MetricType::Gauge => Aggregate::Gauge(0.0),
            MetricType::Histogram | MetricType::Timer | MetricType::Distribution => {
                Aggregate::Samples { count: 0.0, sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY }
            }
            MetricType::Set => Aggregate::Set(HashSet::new()),
        }
    }

    fn merge(&mut self, value: MetricValue, sample_rate: f64) {
        match (self, value) {
            (Aggregate::Counter(total), MetricValue::Number(v)) => *total += v / sample_rate,
            (Aggregate::Gauge(last), MetricValue::Number(v)) => *last = v,
            (Aggregate::Samples { count, sum, min, max }, MetricValue::Number(v)) => {
                *count += 1.0 / sample_rate;
                *sum += v;
                *min = min.min(v);
                *max = max.max(v);
            }
            (Aggregate::Set(members), MetricValue::Member(m)) => {
                members.insert(m);
            }
            // The parser ties the value kind to the metric type, and the type is part of the key.
            _ => {}
        }
    }
}

/// State handed back by a metric worker on flush.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerFlush {
    /// Index of the worker this state came from.
    pub worker: usize,

    /// Aggregated metrics, keyed by identity.
    pub metrics: HashMap<MetricKey, Aggregate>,

    /// Number of metric lines received since the previous flush.
    pub processed: u64,
}

/// An aggregation worker owning one shard of the metric key space.
pub(crate) struct Worker {
    id: usize,
    metrics_rx: Receiver<Metric>,
    control_rx: Receiver<Command<WorkerFlush>>,
    state: WorkerFlush,
}

impl Worker {
    pub fn new(id: usize, metrics_rx: Receiver<Metric>, control_rx: Receiver<Command<WorkerFlush>>) -> Self {
        Self { id, metrics_rx, control_rx, state: WorkerFlush { worker: id, ..Default::default() } }
    }

    fn ingest(&mut self, metric: Metric) {
        trace!(worker = self.id, metric = %metric.key.name, "Ingesting metric.");
        self.state.processed += 1;

        let aggregate = match self.state.metrics.entry(metric.key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let metric_type = entry.key().metric_type;
                entry.insert(Aggregate::new(metric_type))
            }
        };
        aggregate.merge(metric.value, metric.sample_rate);
    }

    fn drain(&mut self) {
        while let Ok(metric) = self.metrics_rx.try_recv() {
            self.ingest(metric);
        }
    }

    /// Runs the worker until it is told to stop, or until every sender is gone.
    pub fn run(mut self) {
        let metrics_rx = self.metrics_rx.clone();
        let control_rx = self.control_rx.clone();

        loop {
            select! {
                recv(metrics_rx) -> msg => match msg {
                    Ok(metric) => self.ingest(metric),
                    Err(_) => break,
                },
                recv(control_rx) -> msg => match msg {
                    Ok(Command::Flush(reply_tx)) => {
                        self.drain();
                        let flushed = std::mem::replace(
                            &mut self.state,
                            WorkerFlush { worker: self.id, ..Default::default() },
                        );
                        let _ = reply_tx.send(flushed);
                    }
                    Ok(Command::Stop) | Err(_) => {
                        self.drain();
                        break;
                    }
                },
            }
        }

        debug!(worker = self.id, pending = self.state.metrics.len(), "Worker stopped.");
    }
}

/// State handed back by the event worker on flush.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFlush {
    /// Events received since the previous flush, in arrival order.
    pub events: Vec<Event>,

    /// Service checks received since the previous flush, in arrival order.
    pub service_checks: Vec<ServiceCheck>,
}

/// The single worker receiving every event and service check.
pub(crate) struct EventWorker {
    events_rx: Receiver<Event>,
    service_checks_rx: Receiver<ServiceCheck>,
    control_rx: Receiver<Command<EventFlush>>,
    state: EventFlush,
}

impl EventWorker {
    pub fn new(
        events_rx: Receiver<Event>,
        service_checks_rx: Receiver<ServiceCheck>,
        control_rx: Receiver<Command<EventFlush>>,
    ) -> Self {
        Self { events_rx, service_checks_rx, control_rx, state: EventFlush::default() }
    }

    fn drain(&mut self) {
        self.state.events.extend(self.events_rx.try_iter());
        self.state.service_checks.extend(self.service_checks_rx.try_iter());
    }

    /// Runs the worker until it is told to stop, or until every sender is gone.
    pub fn run(mut self) {
        let events_rx = self.events_rx.clone();
        let service_checks_rx = self.service_checks_rx.clone();
        let control_rx = self.control_rx.clone();

        loop {
            select! {
                recv(events_rx) -> msg => match msg {
                    Ok(event) => self.state.events.push(event),
                    Err(_) => break,
                },
                recv(service_checks_rx) -> msg => match msg {
                    Ok(check) => self.state.service_checks.push(check),
                    Err(_) => break,
                },
                recv(control_rx) -> msg => match msg {
                    Ok(Command::Flush(reply_tx)) => {
                        self.drain();
                        let _ = reply_tx.send(std::mem::take(&mut self.state));
                    }
                    Ok(Command::Stop) | Err(_) => {
                        self.drain();
                        break;
                    }
                },
            }
        }

        debug!(
            pending_events = self.state.events.len(),
            pending_service_checks = self.state.service_checks.len(),
            "Event worker stopped."
        );
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crossbeam_channel::{bounded, unbounded};

    use super::{Aggregate, Command, EventWorker, Worker};
    use crate::parser::{MetricType, Parser as _, StatsdParser};

    fn parse(line: &str) -> crate::parser::Metric {
        StatsdParser.parse_metric(line.as_bytes()).expect("should parse")
    }

    #[test]
    fn aggregates_by_type() {
        let (metrics_tx, metrics_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let handle = thread::spawn(move || Worker::new(2, metrics_rx, control_rx).run());

        for line in [
            "hits:1|c",
            "hits:2|c|@0.5",
            "temp:20|g",
            "temp:21.5|g",
            "latency:10|ms",
            "latency:30|ms",
            "users:alice|s",
            "users:bob|s",
            "users:alice|s",
        ] {
            metrics_tx.send(parse(line)).expect("worker should be running");
        }

        let (reply_tx, reply_rx) = bounded(1);
        control_tx.send(Command::Flush(reply_tx)).expect("worker should be running");
        let flush = reply_rx.recv().expect("worker should reply");

        assert_eq!(flush.worker, 2);
        assert_eq!(flush.processed, 9);
        assert_eq!(flush.metrics.len(), 4);

        let get = |name: &str| {
            flush.metrics.iter().find(|(k, _)| k.name == name).map(|(_, v)| v.clone()).expect("metric present")
        };
        assert_eq!(get("hits"), Aggregate::Counter(5.0));
        assert_eq!(get("temp"), Aggregate::Gauge(21.5));
        assert_eq!(get("latency"), Aggregate::Samples { count: 2.0, sum: 40.0, min: 10.0, max: 30.0 });
        match get("users") {
            Aggregate::Set(members) => assert_eq!(members.len(), 2),
            other => panic!("unexpected aggregate {other:?}"),
        }

        control_tx.send(Command::Stop).expect("worker should be running");
        handle.join().expect("worker should exit cleanly");
    }

    #[test]
    fn flush_resets_state() {
        let (metrics_tx, metrics_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let handle = thread::spawn(move || Worker::new(0, metrics_rx, control_rx).run());

        metrics_tx.send(parse("hits:1|c")).expect("worker should be running");

        for expected in [1, 0] {
            let (reply_tx, reply_rx) = bounded(1);
            control_tx.send(Command::Flush(reply_tx)).expect("worker should be running");
            let flush = reply_rx.recv().expect("worker should reply");
            assert_eq!(flush.processed, expected);
        }

        drop(metrics_tx);
        handle.join().expect("worker should exit once senders are gone");
    }

    #[test]
    fn same_key_with_different_types_is_kept_apart() {
        let (metrics_tx, metrics_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let handle = thread::spawn(move || Worker::new(0, metrics_rx, control_rx).run());

        metrics_tx.send(parse("x:1|c")).expect("worker should be running");
        metrics_tx.send(parse("x:1|g")).expect("worker should be running");

        let (reply_tx, reply_rx) = bounded(1);
        control_tx.send(Command::Flush(reply_tx)).expect("worker should be running");
        let flush = reply_rx.recv().expect("worker should reply");

        let mut types = flush.metrics.keys().map(|k| k.metric_type).collect::<Vec<_>>();
        types.sort();
        assert_eq!(types, vec![MetricType::Counter, MetricType::Gauge]);

        control_tx.send(Command::Stop).expect("worker should be running");
        handle.join().expect("worker should exit cleanly");
    }

    #[test]
    fn event_worker_buffers_until_flush() {
        let (events_tx, events_rx) = unbounded();
        let (checks_tx, checks_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let handle = thread::spawn(move || EventWorker::new(events_rx, checks_rx, control_rx).run());

        events_tx.send(StatsdParser.parse_event(b"_e{5,4}:title|text").expect("should parse")).expect("running");
        checks_tx.send(StatsdParser.parse_service_check(b"_sc|db.up|0").expect("should parse")).expect("running");
        checks_tx.send(StatsdParser.parse_service_check(b"_sc|db.up|2").expect("should parse")).expect("running");

        let (reply_tx, reply_rx) = bounded(1);
        control_tx.send(Command::Flush(reply_tx)).expect("worker should be running");
        let flush = reply_rx.recv().expect("worker should reply");

        assert_eq!(flush.events.len(), 1);
        assert_eq!(flush.service_checks.len(), 2);

        control_tx.send(Command::Stop).expect("worker should be running");
        handle.join().expect("worker should exit cleanly");
    }
}
