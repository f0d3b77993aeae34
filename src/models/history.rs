use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of entries kept in the history log.
pub const MAX_HISTORY: usize = 5;

/// A single recognized text, as persisted in `ocr_history.json`.
///
/// The on-disk key for `display_time` is `time`, matching files written by
/// earlier releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    /// ISO-8601 UTC timestamp
    pub timestamp: String,
    /// Local wall-clock time for display
    #[serde(rename = "time", default)]
    pub display_time: String,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn now(text: impl Into<String>) -> Self {
        Self::at(text, Utc::now())
    }

    /// Create an entry stamped with the given instant.
    pub fn at(text: impl Into<String>, when: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp: when.to_rfc3339_opts(SecondsFormat::Millis, true),
            display_time: when.with_timezone(&Local).format("%H:%M:%S").to_string(),
        }
    }

    /// Parse a raw JSON value into an entry.
    ///
    /// Returns `None` when the value is not an object or lacks a string `text` field;
    /// such records are dropped by the history reader. Missing timestamps are tolerated.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text = obj.get("text")?.as_str()?.to_string();
        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let display_time = obj
            .get("time")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self {
            text,
            timestamp,
            display_time,
        })
    }
}

/// Insert `entry` at the head of `log`, deduplicating against the newest entry.
///
/// When the newest entry carries byte-identical text it is replaced in place (refreshing
/// its timestamps) instead of adding a duplicate. The log is then truncated to
/// [`MAX_HISTORY`], keeping the newest entries.
pub fn push_entry(log: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    match log.first_mut() {
        Some(newest) if newest.text == entry.text => *newest = entry,
        _ => log.insert(0, entry),
    }
    log.truncate(MAX_HISTORY);
}
