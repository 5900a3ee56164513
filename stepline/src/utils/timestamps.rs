//! Timestamp helpers.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A UTC wall-clock timestamp.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
///
/// # Examples
///
/// ```
/// use stepline::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_timestamp(&now_utc())
}

/// Formats a timestamp as RFC 3339 with microseconds.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Converts a duration to fractional milliseconds for reporting.
#[must_use]
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
