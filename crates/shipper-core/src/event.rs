//! Core record and event types

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Result;

/// Logstash v1 event format version.
pub const EVENT_VERSION: i32 = 1;

/// Journal field holding the cursor of the entry.
pub const CURSOR_FIELD: &str = "__CURSOR";

/// Opaque position in the journal, issued by the journal itself.
///
/// An empty cursor means there is no prior position and reading starts at the
/// live tail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// The "start at the live tail" cursor.
    pub fn tail() -> Self {
        Self::default()
    }

    pub fn is_tail(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(cursor: &str) -> Self {
        Self::new(cursor)
    }
}

impl From<String> for Cursor {
    fn from(cursor: String) -> Self {
        Self(cursor)
    }
}

/// One journal entry exactly as received from the source, before parsing.
///
/// A zero-length record is the end-of-stream sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord(Bytes);

impl RawRecord {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The sentinel sent when the source connection is closed or lost.
    pub fn end_of_stream() -> Self {
        Self(Bytes::new())
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for RawRecord {
    fn from(line: &'static str) -> Self {
        Self(Bytes::from_static(line.as_bytes()))
    }
}

/// Canonical log event in the Logstash v1 shape.
///
/// Serialized as a flat JSON object: `@version`, `@timestamp`, `message` and
/// every field at top level.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub version: i32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, String>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// An empty event with the zero (epoch) timestamp.
    pub fn new() -> Self {
        Self {
            version: EVENT_VERSION,
            message: String::new(),
            timestamp: DateTime::<Utc>::default(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Journal cursor of the entry this event was built from, if it carried one.
    pub fn cursor(&self) -> Option<Cursor> {
        self.fields
            .get(CURSOR_FIELD)
            .filter(|cursor| !cursor.is_empty())
            .map(|cursor| Cursor::new(cursor.as_str()))
    }

    /// `@timestamp` as sent on the wire: RFC 3339, UTC, millisecond precision.
    pub fn wire_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// JSON object for this event. Keys come out sorted.
    pub fn to_value(&self) -> serde_json::Value {
        let mut sorted: BTreeMap<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect();
        sorted.insert("@version".to_string(), self.version.into());
        sorted.insert("@timestamp".to_string(), self.wire_timestamp().into());
        sorted.insert("message".to_string(), self.message.clone().into());
        serde_json::Value::Object(sorted.into_iter().collect())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_value())?)
    }

    /// The event as one newline-terminated line.
    pub fn to_json_line(&self) -> Result<Vec<u8>> {
        let mut line = self.to_json()?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference_event() -> Event {
        Event::new()
            .with_message("foo")
            .with_field("extra_field", "text here")
            .with_timestamp(Utc.timestamp_opt(1515151515, 0).unwrap())
    }

    #[test]
    fn test_new_event() {
        let event = Event::new();
        assert_eq!(event.version, 1);
        assert_eq!(event.message, "");
        assert_eq!(event.timestamp.timestamp(), 0);
        assert!(event.fields.is_empty());
    }

    #[test]
    fn test_to_json() {
        let json = String::from_utf8(reference_event().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"@timestamp":"2018-01-05T11:25:15.000Z","@version":1,"extra_field":"text here","message":"foo"}"#
        );
    }

    #[test]
    fn test_json_line_is_newline_terminated() {
        let line = reference_event().to_json_line().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_cursor_field() {
        let event = Event::new().with_field(CURSOR_FIELD, "s=abc;i=1");
        assert_eq!(event.cursor(), Some(Cursor::new("s=abc;i=1")));

        assert_eq!(Event::new().cursor(), None);
        assert_eq!(Event::new().with_field(CURSOR_FIELD, "").cursor(), None);
    }

    #[test]
    fn test_end_of_stream_sentinel() {
        assert!(RawRecord::end_of_stream().is_end_of_stream());
        assert!(!RawRecord::from("{}").is_end_of_stream());
    }

    #[test]
    fn test_tail_cursor() {
        assert!(Cursor::tail().is_tail());
        assert!(!Cursor::from("abc").is_tail());
        assert_eq!(Cursor::from("abc").to_string(), "abc");
    }
}
