//! Timestamps for status records and log lines

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// ISO-8601 rendering used in log lines (millisecond precision, `Z` suffix)
pub fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format a status-file log entry: `[<ISO-8601>] text`
pub fn log_line(text: &str) -> String {
    format!("[{}] {}", iso8601(now()), text)
}
