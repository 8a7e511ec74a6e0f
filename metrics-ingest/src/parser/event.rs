use super::{as_str, parse_tags, parse_timestamp, ParseError};

/// Event priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priority {
    /// Normal priority.
    #[default]
    Normal,

    /// Low priority.
    Low,
}

/// Event alert type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlertType {
    /// Informational.
    #[default]
    Info,

    /// Warning.
    Warning,

    /// Error.
    Error,

    /// Success.
    Success,
}

/// A parsed event line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// Title.
    pub title: String,

    /// Text, with `\n` escape sequences expanded.
    pub text: String,

    /// Timestamp given by the client (`d:`), in seconds since the Unix epoch.
    pub timestamp: Option<i64>,

    /// Hostname (`h:`).
    pub hostname: Option<String>,

    /// Aggregation key (`k:`).
    pub aggregation_key: Option<String>,

    /// Priority (`p:`).
    pub priority: Priority,

    /// Source type name (`s:`).
    pub source_type: Option<String>,

    /// Alert type (`t:`).
    pub alert_type: AlertType,

    /// Tags, sorted.
    pub tags: Vec<String>,
}

pub(super) fn parse(packet: &[u8]) -> Result<Event, ParseError> {
    let line = as_str(packet)?;

    let rest = line.strip_prefix("_e{").ok_or(ParseError::InvalidEventHeader)?;
    let (lengths, rest) = rest.split_once("}:").ok_or(ParseError::InvalidEventHeader)?;
    let (title_len, text_len) = lengths.split_once(',').ok_or(ParseError::InvalidEventHeader)?;
    let title_len = title_len.parse::<usize>().map_err(|_| ParseError::InvalidEventHeader)?;
    let text_len = text_len.parse::<usize>().map_err(|_| ParseError::InvalidEventHeader)?;
    if title_len == 0 {
        return Err(ParseError::InvalidEventHeader);
    }

    // Lengths are byte lengths, so every slice below must land on a character boundary, which `get` checks for us.
    let title = rest.get(..title_len).ok_or(ParseError::EventLengthMismatch)?;
    let rest = rest.get(title_len..).ok_or(ParseError::EventLengthMismatch)?;
    let rest = rest.strip_prefix('|').ok_or(ParseError::EventLengthMismatch)?;
    let text = rest.get(..text_len).ok_or(ParseError::EventLengthMismatch)?;
    let rest = rest.get(text_len..).ok_or(ParseError::EventLengthMismatch)?;

    let mut event =
        Event { title: title.to_owned(), text: text.replace("\\n", "\n"), ..Default::default() };

    if rest.is_empty() {
        return Ok(event);
    }
    let rest = rest.strip_prefix('|').ok_or(ParseError::EventLengthMismatch)?;

    for section in rest.split('|') {
        if let Some(ts) = section.strip_prefix("d:") {
            event.timestamp = Some(parse_timestamp(ts)?);
        } else if let Some(host) = section.strip_prefix("h:") {
            event.hostname = Some(host.to_owned());
        } else if let Some(key) = section.strip_prefix("k:") {
            event.aggregation_key = Some(key.to_owned());
        } else if let Some(priority) = section.strip_prefix("p:") {
            event.priority = match priority {
                "normal" => Priority::Normal,
                "low" => Priority::Low,
                _ => return Err(ParseError::InvalidField(section.to_owned())),
            };
        } else if let Some(source) = section.strip_prefix("s:") {
            event.source_type = Some(source.to_owned());
        } else if let Some(alert) = section.strip_prefix("t:") {
            event.alert_type = match alert {
                "info" => AlertType::Info,
                "warning" => AlertType::Warning,
                "error" => AlertType::Error,
                "success" => AlertType::Success,
                _ => return Err(ParseError::InvalidField(section.to_owned())),
            };
        } else if let Some(tags) = section.strip_prefix('#') {
            event.tags = parse_tags(tags);
        } else {
            return Err(ParseError::InvalidField(section.to_owned()));
        }
    }

    Ok(event)
}
