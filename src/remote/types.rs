// Remote dataset payload types.
// A payload is an opaque JSON document that may carry its own `date`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the optional top-level field holding the dataset's own timestamp.
pub const DATE_FIELD: &str = "date";

/// A decoded dataset document as produced by a fetcher or read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetPayload {
    pub data: Value,
}

impl DatasetPayload {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// The timestamp embedded in the document, if present and parseable.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.data
            .get(DATE_FIELD)
            .and_then(Value::as_str)
            .and_then(parse_iso8601)
    }

    /// Look up a top-level field of the document.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Serialize to the UTF-8 JSON form kept on disk.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.data)
    }

    /// Parse the on-disk form back into a payload.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes).map(Self::new)
    }
}

impl From<Value> for DatasetPayload {
    fn from(data: Value) -> Self {
        Self::new(data)
    }
}

/// Parse an ISO-8601 timestamp. Forms without an offset are taken as UTC.
fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
