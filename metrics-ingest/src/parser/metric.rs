use std::{fmt, hash::Hasher as _};

use rapidhash::fast::RapidHasher;

use super::{as_str, parse_tags, ParseError};

/// Metric type.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetricType {
    /// Counter (`c`).
    Counter,

    /// Gauge (`g`).
    Gauge,

    /// Histogram (`h`).
    Histogram,

    /// Timer (`ms`).
    Timer,

    /// Distribution (`d`).
    Distribution,

    /// Set (`s`).
    Set,
}

impl MetricType {
    fn from_wire(ty: &str) -> Result<Self, ParseError> {
        match ty {
            "c" => Ok(MetricType::Counter),
            "g" => Ok(MetricType::Gauge),
            "h" => Ok(MetricType::Histogram),
            "ms" => Ok(MetricType::Timer),
            "d" => Ok(MetricType::Distribution),
            "s" => Ok(MetricType::Set),
            "" => Err(ParseError::MissingType),
            other => Err(ParseError::UnknownType(other.to_owned())),
        }
    }

    /// Returns the wire representation of this type.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Histogram => "h",
            MetricType::Timer => "ms",
            MetricType::Distribution => "d",
            MetricType::Set => "s",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a metric: its name, type, and sorted tags.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetricKey {
    /// Metric name.
    pub name: String,

    /// Metric type.
    pub metric_type: MetricType,

    /// Tags, sorted.
    pub tags: Vec<String>,
}

impl MetricKey {
    /// Computes the routing digest for this key.
    ///
    /// The digest is a 64-bit rapidhash (fixed seed) over the name followed by `:`, the wire type followed by `|`, and
    /// each sorted tag followed by a comma. It is stable across processes built against the same hash implementation, so it can be used to shard
    /// consistently across several ingestion processes.
    pub fn digest(&self) -> u64 {
        let mut hasher = RapidHasher::default();
        hasher.write(self.name.as_bytes());
        hasher.write_u8(b':');
        hasher.write(self.metric_type.as_str().as_bytes());
        hasher.write_u8(b'|');
        for tag in &self.tags {
            hasher.write(tag.as_bytes());
            hasher.write_u8(b',');
        }
        hasher.finish()
    }
}

/// Value carried by a metric line.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// A numeric value, for every type except sets.
    Number(f64),

    /// A set member.
    Member(String),
}

/// A parsed metric line.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Metric identity.
    pub key: MetricKey,

    /// Routing digest of [`Metric::key`], computed once at parse time.
    pub digest: u64,

    /// Value.
    pub value: MetricValue,

    /// Sample rate, in the range (0, 1].
    pub sample_rate: f64,
}

pub(super) fn parse(packet: &[u8]) -> Result<Metric, ParseError> {
    let line = as_str(packet)?;
    let mut sections = line.split('|');

    // `split` always yields at least one item.
    let head = sections.next().unwrap_or_default();
    let (name, raw_value) = head.split_once(':').ok_or(ParseError::MissingValue)?;
    if name.is_empty() {
        return Err(ParseError::MissingName);
    }
    if raw_value.is_empty() {
        return Err(ParseError::MissingValue);
    }

    let metric_type = MetricType::from_wire(sections.next().ok_or(ParseError::MissingType)?)?;
    let value = match metric_type {
        MetricType::Set => MetricValue::Member(raw_value.to_owned()),
        _ => raw_value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(MetricValue::Number)
            .ok_or_else(|| ParseError::InvalidValue(raw_value.to_owned()))?,
    };

    let mut sample_rate = 1.0;
    let mut tags = Vec::new();
    for section in sections {
        if let Some(rate) = section.strip_prefix('@') {
            sample_rate = rate
                .parse::<f64>()
                .ok()
                .filter(|r| *r > 0.0 && *r <= 1.0)
                .ok_or_else(|| ParseError::InvalidSampleRate(rate.to_owned()))?;
        } else if let Some(raw_tags) = section.strip_prefix('#') {
            tags = parse_tags(raw_tags);
        } else if section.starts_with("c:") || section.starts_with('T') {
            // Container ID and client-side timestamp (DogStatsD 1.2/1.3) do not affect routing or aggregation.
        } else {
            return Err(ParseError::InvalidField(section.to_owned()));
        }
    }

    let key = MetricKey { name: name.to_owned(), metric_type, tags };
    let digest = key.digest();

    Ok(Metric { key, digest, value, sample_rate })
}
