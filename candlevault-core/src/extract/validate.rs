//! Series validation: schema, continuity and coverage checks.
//!
//! Gaps are advisory (brief provider outages are expected); schema and
//! coverage failures block the symbol.

use super::range::midnight;
use crate::domain::{Interval, Series, REQUIRED_FIELDS};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;
use thiserror::Error;

/// The largest gap between consecutive candles, when it exceeds twice the
/// interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGapWarning {
    pub gap: Duration,
    /// Open time of the candle before the gap.
    pub after: DateTime<Utc>,
    /// Open time of the candle after the gap.
    pub before: DateTime<Utc>,
    /// Gaps above the threshold, including this one.
    pub gap_count: usize,
}

impl fmt::Display for TimeGapWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time gap of {}m between {} and {} ({} gaps above threshold)",
            self.gap.num_minutes(),
            self.after.to_rfc3339(),
            self.before.to_rfc3339(),
            self.gap_count
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub rows: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub max_gap: Option<Duration>,
    pub warnings: Vec<TimeGapWarning>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("series is empty")]
    EmptySeries,

    #[error("{records} records are missing required fields: {}", .missing.join(", "))]
    Schema {
        missing: Vec<&'static str>,
        records: usize,
    },

    #[error("series starts late: first candle {actual}, expected by {expected}")]
    LateStart {
        expected: NaiveDate,
        actual: DateTime<Utc>,
    },

    #[error("series ends early: last candle {actual}, expected through {expected}")]
    EarlyEnd {
        expected: NaiveDate,
        actual: DateTime<Utc>,
    },
}

/// Coverage slack at either end: one day, or one bar for intervals longer
/// than a day (weekly bars open on Mondays, monthly bars on the 1st).
fn coverage_tolerance(interval: Interval) -> Duration {
    interval.duration().max(Duration::days(1))
}

/// Validate a completed series against the job's `[expected_start, expected_end)`.
pub fn validate(
    series: &Series,
    interval: Interval,
    expected_start: NaiveDate,
    expected_end: NaiveDate,
) -> Result<ValidationReport, ValidationError> {
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return Err(ValidationError::EmptySeries);
    };

    let mut missing: Vec<&'static str> = Vec::new();
    let mut records = 0;
    for candle in series {
        let absent = candle.missing_required();
        if !absent.is_empty() {
            records += 1;
            for name in absent {
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
    }
    if records > 0 {
        missing.sort_by_key(|name| REQUIRED_FIELDS.iter().position(|f| f == name));
        return Err(ValidationError::Schema { missing, records });
    }

    let threshold = interval.duration() * 2;
    let mut max_gap: Option<(Duration, DateTime<Utc>, DateTime<Utc>)> = None;
    let mut gap_count = 0;
    for pair in series.as_slice().windows(2) {
        let gap = pair[1].open_time - pair[0].open_time;
        if gap > threshold {
            gap_count += 1;
        }
        if max_gap.map_or(true, |(g, _, _)| gap > g) {
            max_gap = Some((gap, pair[0].open_time, pair[1].open_time));
        }
    }
    let warnings = match max_gap {
        Some((gap, after, before)) if gap > threshold => vec![TimeGapWarning {
            gap,
            after,
            before,
            gap_count,
        }],
        _ => Vec::new(),
    };

    let tolerance = coverage_tolerance(interval);
    if first.open_time > midnight(expected_start) + tolerance {
        return Err(ValidationError::LateStart {
            expected: expected_start,
            actual: first.open_time,
        });
    }
    if last.open_time < midnight(expected_end) - tolerance {
        return Err(ValidationError::EarlyEnd {
            expected: expected_end,
            actual: last.open_time,
        });
    }

    Ok(ValidationReport {
        rows: series.len(),
        first: first.open_time,
        last: last.open_time,
        max_gap: max_gap.map(|(g, _, _)| g),
        warnings,
    })
}
