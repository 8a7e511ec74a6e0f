use super::{as_str, parse_tags, parse_timestamp, ParseError};

/// Service check status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceCheckStatus {
    /// `0`
    Ok,

    /// `1`
    Warning,

    /// `2`
    Critical,

    /// `3`
    Unknown,
}

/// A parsed service check line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCheck {
    /// Check name.
    pub name: String,

    /// Status.
    pub status: ServiceCheckStatus,

    /// Timestamp given by the client (`d:`), in seconds since the Unix epoch.
    pub timestamp: Option<i64>,

    /// Hostname (`h:`).
    pub hostname: Option<String>,

    /// Message (`m:`).
    pub message: Option<String>,

    /// Tags, sorted.
    pub tags: Vec<String>,
}

pub(super) fn parse(packet: &[u8]) -> Result<ServiceCheck, ParseError> {
    let line = as_str(packet)?;

    let mut sections = line.split('|');
    if sections.next() != Some("_sc") {
        return Err(ParseError::InvalidField(line.to_owned()));
    }

    let name = sections.next().filter(|n| !n.is_empty()).ok_or(ParseError::MissingServiceCheckName)?;
    let status = match sections.next() {
        Some("0") => ServiceCheckStatus::Ok,
        Some("1") => ServiceCheckStatus::Warning,
        Some("2") => ServiceCheckStatus::Critical,
        Some("3") => ServiceCheckStatus::Unknown,
        Some(other) => return Err(ParseError::InvalidStatus(other.to_owned())),
        None => return Err(ParseError::InvalidStatus(String::new())),
    };

    let mut check = ServiceCheck {
        name: name.to_owned(),
        status,
        timestamp: None,
        hostname: None,
        message: None,
        tags: Vec::new(),
    };

    for section in sections {
        if let Some(ts) = section.strip_prefix("d:") {
            check.timestamp = Some(parse_timestamp(ts)?);
        } else if let Some(host) = section.strip_prefix("h:") {
            check.hostname = Some(host.to_owned());
        } else if let Some(tags) = section.strip_prefix('#') {
            check.tags = parse_tags(tags);
        } else if let Some(message) = section.strip_prefix("m:") {
            check.message = Some(message.to_owned());
        } else {
            return Err(ParseError::InvalidField(section.to_owned()));
        }
    }

    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::{parse, ServiceCheckStatus};
    use crate::parser::ParseError;

    #[test]
    fn parses_service_check() {
        let check = parse(b"_sc|db.up|2|d:1700000000|h:db-1|#env:prod|m:connection refused")
            .expect("should parse");
        assert_eq!(check.name, "db.up");
        assert_eq!(check.status, ServiceCheckStatus::Critical);
        assert_eq!(check.timestamp, Some(1_700_000_000));
        assert_eq!(check.hostname.as_deref(), Some("db-1"));
        assert_eq!(check.tags, vec!["env:prod"]);
        assert_eq!(check.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn rejects_malformed_service_checks() {
        assert_eq!(parse(b"_sc"), Err(ParseError::MissingServiceCheckName));
        assert_eq!(parse(b"_sc||0"), Err(ParseError::MissingServiceCheckName));
        assert_eq!(parse(b"_sc|db.up"), Err(ParseError::InvalidStatus(String::new())));
        assert_eq!(parse(b"_sc|db.up|7"), Err(ParseError::InvalidStatus("7".to_owned())));
        assert_eq!(parse(b"_scx|db.up|0"), Err(ParseError::InvalidField("_scx|db.up|0".to_owned())));
        assert_eq!(parse(b"_sc|db.up|0|z:1"), Err(ParseError::InvalidField("z:1".to_owned())));
    }
}
