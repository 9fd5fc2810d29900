//! Journal record to Logstash event translation
//!
//! The journal exports every field as a JSON string, except that payloads
//! which are not valid UTF-8 are exported as an array of byte values. Two keys
//! are reserved: `__REALTIME_TIMESTAMP` becomes the event timestamp and
//! `MESSAGE` becomes the event message. Everything else is copied into the
//! event fields.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::{Event, RawRecord, TranslateError};

/// Wall clock time of the entry, microseconds since the epoch.
pub const TIMESTAMP_FIELD: &str = "__REALTIME_TIMESTAMP";

pub const MESSAGE_FIELD: &str = "MESSAGE";

/// Shape of a journal field value, resolved once at the parse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalValue {
    Text(String),
    Bytes(Vec<u8>),
    Other(Value),
}

impl From<Value> for JournalValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => JournalValue::Text(text),
            Value::Array(items) => match to_bytes(&items) {
                Some(bytes) => JournalValue::Bytes(bytes),
                None => JournalValue::Other(Value::Array(items)),
            },
            other => JournalValue::Other(other),
        }
    }
}

impl JournalValue {
    /// Decode a string or byte-array value into text. Invalid UTF-8 in a byte
    /// array is replaced rather than rejected.
    pub fn into_text(self) -> Option<String> {
        match self {
            JournalValue::Text(text) => Some(text),
            JournalValue::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            JournalValue::Other(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            JournalValue::Text(_) => "string".to_string(),
            JournalValue::Bytes(_) => "byte array".to_string(),
            JournalValue::Other(value) => value_kind(value).to_string(),
        }
    }
}

fn to_bytes(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert a journal timestamp (microseconds since the epoch) to a UTC instant.
///
/// The quotient is taken as whole seconds and the remainder is kept as
/// sub-second ticks on top of it; negative remainders borrow from the seconds.
pub fn journal_time(micros: i64) -> Option<DateTime<Utc>> {
    let seconds = micros / 1_000_000;
    let ticks = micros % 1_000_000;
    DateTime::from_timestamp(seconds, 0)?.checked_add_signed(Duration::nanoseconds(ticks))
}

fn parse_timestamp(value: Value) -> Result<DateTime<Utc>, TranslateError> {
    let error = |reason: String| TranslateError::TimestampParse {
        key: TIMESTAMP_FIELD.to_string(),
        reason,
    };

    let text = match JournalValue::from(value) {
        JournalValue::Text(text) => text,
        other => return Err(error(format!("expected a string, found {}", other.describe()))),
    };
    let micros: i64 = text
        .parse()
        .map_err(|e| error(format!("{:?}: {}", text, e)))?;
    journal_time(micros).ok_or_else(|| error(format!("{} is out of range", micros)))
}

/// Build an [`Event`] from one raw journal record.
///
/// Missing timestamp or message keys are not errors; the event keeps its zero
/// timestamp or empty message.
pub fn translate(record: &RawRecord) -> Result<Event, TranslateError> {
    let parsed: Value = serde_json::from_slice(record.as_bytes())
        .map_err(|e| TranslateError::InvalidJson(e.to_string()))?;
    let object = match parsed {
        Value::Object(object) => object,
        _ => return Err(TranslateError::NotAnObject),
    };

    let mut event = Event::new();
    for (key, value) in object {
        match key.as_str() {
            TIMESTAMP_FIELD => event.timestamp = parse_timestamp(value)?,
            MESSAGE_FIELD => {
                let value = JournalValue::from(value);
                let found = value.describe();
                event.message = value
                    .into_text()
                    .ok_or(TranslateError::MessageEncoding { key, found })?;
            }
            _ => match JournalValue::from(value) {
                JournalValue::Text(text) => {
                    event.fields.insert(key, text);
                }
                other => {
                    return Err(TranslateError::MalformedField {
                        key,
                        found: other.describe(),
                    })
                }
            },
        }
    }
    Ok(event)
}
