//! Line codec for measurement events.
//!
//! A measurement travels as one text line:
//!
//! ```text
//! <|<timestamp>|<tag>|[<elapsed_time>|]<event_count>|<kind>|>
//! ```
//!
//! `elapsed_time` is only present for timers (`kind = t`) and is printed with six
//! fixed decimals. The timestamp uses the shortest representation that parses back
//! to the same `f64`. Lines without the start/end markers are ordinary log output
//! and decode to `None`.

use thiserror::Error;

use super::{EventKind, Measurement, MeasurementEvent};

/// Version of the field layout below. Carried out-of-band, never written into lines.
pub const FORMAT_VERSION: u32 = 1;

pub const START_TOKEN: &str = "<|";
pub const END_TOKEN: &str = "|>";
pub const SEPARATOR: char = '|';

/// Decimal digits used for elapsed times.
pub const ELAPSED_PRECISION: usize = 6;

/// Field count of a timer body: timestamp, tag, elapsed, count.
const TIMER_FIELDS: usize = 4;
/// Field count of a counter body: timestamp, tag, count.
const COUNTER_FIELDS: usize = 3;

/// Errors raised when an event cannot be expressed in the line format.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("tag is empty")]
    EmptyTag,

    #[error("tag {tag:?} contains reserved character {found:?}")]
    ReservedCharacter { tag: String, found: char },

    #[error("event_count must be at least 1")]
    ZeroEventCount,

    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
}

/// Errors raised for a line that carries the markers but is malformed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown kind {symbol:?}")]
    UnknownKind { symbol: String },

    #[error("{kind} line has {found} fields, expected {expected}")]
    FieldCount {
        kind: EventKind,
        expected: usize,
        found: usize,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("tag is empty")]
    EmptyTag,

    #[error("event_count must be at least 1")]
    ZeroEventCount,
}

/// Encode an event into its line form.
pub fn encode(event: &MeasurementEvent) -> Result<String, EncodingError> {
    validate_tag(&event.tag)?;

    if event.event_count == 0 {
        return Err(EncodingError::ZeroEventCount);
    }
    if !event.timestamp.is_finite() {
        return Err(EncodingError::NonFinite { field: "timestamp" });
    }

    let kind = event.kind().symbol();
    let line = match event.measurement {
        Measurement::Timer { elapsed_time } => {
            if !elapsed_time.is_finite() {
                return Err(EncodingError::NonFinite {
                    field: "elapsed_time",
                });
            }
            format!(
                "{START_TOKEN}{ts}{SEPARATOR}{tag}{SEPARATOR}{elapsed:.prec$}{SEPARATOR}{count}{SEPARATOR}{kind}{END_TOKEN}",
                ts = event.timestamp,
                tag = event.tag,
                elapsed = elapsed_time,
                prec = ELAPSED_PRECISION,
                count = event.event_count,
            )
        }
        Measurement::Counter => format!(
            "{START_TOKEN}{ts}{SEPARATOR}{tag}{SEPARATOR}{count}{SEPARATOR}{kind}{END_TOKEN}",
            ts = event.timestamp,
            tag = event.tag,
            count = event.event_count,
        ),
    };

    Ok(line)
}

/// Decode a single log line.
///
/// Returns `Ok(None)` for lines that are not measurements. Surrounding whitespace
/// (including the trailing newline) is ignored.
pub fn decode(line: &str) -> Result<Option<MeasurementEvent>, ParseError> {
    let Some(body) = measurement_body(line) else {
        return Ok(None);
    };

    let fields: Vec<&str> = body.split(SEPARATOR).collect();

    // `split` always yields at least one item.
    let symbol = fields[fields.len() - 1];
    let kind = EventKind::from_symbol(symbol).ok_or_else(|| ParseError::UnknownKind {
        symbol: symbol.to_string(),
    })?;
    let values = &fields[..fields.len() - 1];

    let expected = match kind {
        EventKind::Timer => TIMER_FIELDS,
        EventKind::Counter => COUNTER_FIELDS,
    };
    if values.len() != expected {
        return Err(ParseError::FieldCount {
            kind,
            expected,
            found: values.len(),
        });
    }

    let timestamp = parse_float(values[0], "timestamp")?;
    let tag = values[1];
    if tag.is_empty() {
        return Err(ParseError::EmptyTag);
    }

    let (measurement, count_field) = match kind {
        EventKind::Timer => (
            Measurement::Timer {
                elapsed_time: parse_float(values[2], "elapsed_time")?,
            },
            values[3],
        ),
        EventKind::Counter => (Measurement::Counter, values[2]),
    };

    let event_count = count_field
        .parse::<u64>()
        .map_err(|_| ParseError::InvalidNumber {
            field: "event_count",
            value: count_field.to_string(),
        })?;
    if event_count == 0 {
        return Err(ParseError::ZeroEventCount);
    }

    Ok(Some(MeasurementEvent {
        timestamp,
        tag: tag.to_string(),
        measurement,
        event_count,
    }))
}

/// Whether the line is bounded by the measurement markers.
pub fn is_measurement_line(line: &str) -> bool {
    measurement_body(line).is_some()
}

fn measurement_body(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(START_TOKEN)
        .and_then(|rest| rest.strip_suffix(END_TOKEN))
}

fn validate_tag(tag: &str) -> Result<(), EncodingError> {
    if tag.is_empty() {
        return Err(EncodingError::EmptyTag);
    }
    if let Some(found) = tag.chars().find(|c| matches!(c, '|' | '\n' | '\r')) {
        return Err(EncodingError::ReservedCharacter {
            tag: tag.to_string(),
            found,
        });
    }
    Ok(())
}

fn parse_float(raw: &str, field: &'static str) -> Result<f64, ParseError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber {
            field,
            value: raw.to_string(),
        }),
    }
}
