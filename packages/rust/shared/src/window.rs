//! "Days back" time windows.
//!
//! The collection endpoint takes a `lastModified` timestamp, while rows are
//! filtered by calendar date. Both forms come from the same instant so the
//! two filters never disagree about which day is the boundary.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// A lookback window ending now and starting `days` days earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    since: DateTime<Utc>,
}

impl TimeWindow {
    /// Window starting `days` days before the current instant.
    pub fn days_back(days: u32) -> Self {
        Self::at(Utc::now(), days)
    }

    /// Window starting `days` days before `now`, truncated to whole seconds.
    pub fn at(now: DateTime<Utc>, days: u32) -> Self {
        let since = now - Duration::days(i64::from(days));
        let since = DateTime::from_timestamp(since.timestamp(), 0).unwrap_or(since);
        Self { since }
    }

    /// The start instant.
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// ISO-8601 form used as the collection query path segment,
    /// e.g. `2024-03-01T14:05:09Z`.
    pub fn query_param(&self) -> String {
        self.since.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Timezone-naive calendar date of the start instant (midnight).
    pub fn cutoff_date(&self) -> NaiveDate {
        self.since.date_naive()
    }
}

/// Parse a date as published by the bill API into a naive calendar date.
///
/// Accepts plain dates, RFC 3339 timestamps (local date is kept, offset is
/// dropped) and naive timestamps with a `T` or space separator.
pub fn parse_api_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Epoch milliseconds of `date` at UTC midnight, the store's date encoding.
pub fn date_to_epoch_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}
