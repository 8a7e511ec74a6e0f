//! Line parsers for the statsd/DogStatsD wire format.
//!
//! Parsers take a single line (one chunk of a datagram) and produce a value that owns all of its data, so that the
//! buffer the line was read into can be handed back to the pool as soon as parsing is done.

use thiserror::Error;

mod event;
pub use self::event::{AlertType, Event, Priority};

mod metric;
pub use self::metric::{Metric, MetricKey, MetricType, MetricValue};

mod service_check;
pub use self::service_check::{ServiceCheck, ServiceCheckStatus};

/// Errors that could occur while parsing a line.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The line was not valid UTF-8.
    #[error("packet is not valid UTF-8")]
    InvalidUtf8,

    /// The metric name was missing or empty.
    #[error("missing metric name")]
    MissingName,

    /// The metric value was missing.
    #[error("missing metric value")]
    MissingValue,

    /// The metric value could not be parsed as a number.
    #[error("invalid metric value '{0}'")]
    InvalidValue(String),

    /// The metric type was missing.
    #[error("missing metric type")]
    MissingType,

    /// The metric type was not one of the known types.
    #[error("unknown metric type '{0}'")]
    UnknownType(String),

    /// The sample rate was not a number in the range (0, 1].
    #[error("invalid sample rate '{0}'")]
    InvalidSampleRate(String),

    /// The `_e{title_len,text_len}:` event header was malformed.
    #[error("malformed event header")]
    InvalidEventHeader,

    /// The event title or text did not match the lengths given in the header.
    #[error("event title/text does not match the declared lengths")]
    EventLengthMismatch,

    /// The service check name was missing or empty.
    #[error("missing service check name")]
    MissingServiceCheckName,

    /// The service check status was not one of 0, 1, 2 or 3.
    #[error("invalid service check status '{0}'")]
    InvalidStatus(String),

    /// A timestamp field was not a valid integer.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// An optional field had an unrecognized prefix or value.
    #[error("invalid field '{0}'")]
    InvalidField(String),
}

/// Parses lines into metrics, events, and service checks.
///
/// Implementations must treat every malformed input as an ordinary error value: the router calls them on the hot path
/// for every line of every datagram, and a panic would take the reading task down with it.
pub trait Parser: Send + Sync {
    /// Parses a metric line.
    ///
    /// # Errors
    ///
    /// If the line is not a valid metric, an error is returned describing why.
    fn parse_metric(&self, packet: &[u8]) -> Result<Metric, ParseError>;

    /// Parses an event line, which starts with `_e{`.
    ///
    /// # Errors
    ///
    /// If the line is not a valid event, an error is returned describing why.
    fn parse_event(&self, packet: &[u8]) -> Result<Event, ParseError>;

    /// Parses a service check line, which starts with `_sc`.
    ///
    /// # Errors
    ///
    /// If the line is not a valid service check, an error is returned describing why.
    fn parse_service_check(&self, packet: &[u8]) -> Result<ServiceCheck, ParseError>;
}

/// Parser for the DogStatsD flavor of the statsd line protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsdParser;

impl Parser for StatsdParser {
    fn parse_metric(&self, packet: &[u8]) -> Result<Metric, ParseError> {
        metric::parse(packet)
    }

    fn parse_event(&self, packet: &[u8]) -> Result<Event, ParseError> {
        event::parse(packet)
    }

    fn parse_service_check(&self, packet: &[u8]) -> Result<ServiceCheck, ParseError> {
        service_check::parse(packet)
    }
}

fn as_str(packet: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(packet).map_err(|_| ParseError::InvalidUtf8)
}

/// Parses a `#tag1,tag2:value` section into a sorted list of owned tags.
///
/// Empty tags (from `#a,,b` or a bare `#`) are skipped.
fn parse_tags(section: &str) -> Vec<String> {
    let mut tags = section.split(',').filter(|t| !t.is_empty()).map(str::to_owned).collect::<Vec<_>>();
    tags.sort_unstable();
    tags
}

fn parse_timestamp(value: &str) -> Result<i64, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidTimestamp(value.to_owned()))
}
