//! Raw provider rows → typed candles.

use super::provider::RawRow;
use crate::domain::Candle;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Candles from one response, plus how many rows had no usable open time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub candles: Vec<Candle>,
    pub dropped: usize,
}

fn as_f64(v: Option<&Value>) -> Option<f64> {
    let x = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    x.is_finite().then_some(x)
}

fn as_i64(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn as_millis(v: Option<&Value>) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(as_i64(v)?)
}

/// Normalize one row. Returns `None` only when the open time is unusable;
/// any other malformed field becomes `None` on the candle.
pub fn normalize_row(row: &RawRow) -> Option<Candle> {
    let open_time = as_millis(row.first())?;
    Some(Candle {
        open_time,
        open: as_f64(row.get(1)),
        high: as_f64(row.get(2)),
        low: as_f64(row.get(3)),
        close: as_f64(row.get(4)),
        volume: as_f64(row.get(5)),
        close_time: as_millis(row.get(6)),
        quote_volume: as_f64(row.get(7)),
        trade_count: as_i64(row.get(8)).and_then(|n| u64::try_from(n).ok()),
        taker_buy_base_volume: as_f64(row.get(9)),
        taker_buy_quote_volume: as_f64(row.get(10)),
    })
}

/// Normalize a response for the window `[from, until)`.
///
/// Output is sorted by open time with duplicates collapsed (last row wins).
/// Rows outside the window are discarded silently: providers may return the
/// bar straddling a boundary.
pub fn normalize_rows(rows: &[RawRow], from: DateTime<Utc>, until: DateTime<Utc>) -> Normalized {
    let mut dropped = 0;
    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        match normalize_row(row) {
            Some(c) if c.open_time >= from && c.open_time < until => candles.push(c),
            Some(_) => {}
            None => dropped += 1,
        }
    }
    candles.sort_by_key(|c| c.open_time);
    // dedup_by keeps the first of a run; reverse so the last row survives
    candles.reverse();
    candles.dedup_by_key(|c| c.open_time);
    candles.reverse();
    Normalized { candles, dropped }
}
