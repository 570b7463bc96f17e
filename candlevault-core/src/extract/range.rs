//! Date-range partitioning into provider-sized batch windows.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Half-open day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Window bounds as UTC instants (midnight to midnight).
    pub fn instants(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (midnight(self.start), midnight(self.end))
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range: start {start} is not before end {end}")]
    EmptyRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid range: batch size must be at least one day (got {0})")]
    BatchSize(i64),
}

/// Split `[start, end)` into consecutive windows of `batch_size_days`, the
/// last one clipped to `end`.
pub fn partition(
    start: NaiveDate,
    end: NaiveDate,
    batch_size_days: i64,
) -> Result<Vec<Window>, RangeError> {
    if start >= end {
        return Err(RangeError::EmptyRange { start, end });
    }
    if batch_size_days <= 0 {
        return Err(RangeError::BatchSize(batch_size_days));
    }

    // Steps too large for chrono simply cover the whole range.
    let step = Duration::try_days(batch_size_days);
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = step
            .and_then(|s| cursor.checked_add_signed(s))
            .map_or(end, |d| d.min(end));
        windows.push(Window {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    Ok(windows)
}
