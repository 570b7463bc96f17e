//! Multi-symbol outer join on `open_time`.
//!
//! Series are folded left to right: the first two are joined, then the
//! result with the third, and so on. A timestamp present in any input yields
//! exactly one output row; symbols without a candle at that timestamp get
//! `None`. Nothing is forward-filled and nothing is dropped.

use crate::domain::{Candle, Series, FIELD_NAMES};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("nothing to merge")]
    NoInputs,

    #[error("symbol '{0}' appears more than once; columns would collide")]
    DuplicateSymbol(String),
}

/// One output row: the key plus one optional candle per symbol, in
/// `MergedDataset::symbols` order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    pub open_time: DateTime<Utc>,
    pub candles: Vec<Option<Candle>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedDataset {
    pub symbols: Vec<String>,
    pub rows: Vec<MergedRow>,
}

impl MergedDataset {
    fn from_series(symbol: String, series: Series) -> Self {
        let rows = series
            .into_candles()
            .into_iter()
            .map(|c| MergedRow {
                open_time: c.open_time,
                candles: vec![Some(c)],
            })
            .collect();
        Self {
            symbols: vec![symbol],
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `open_time`, then `{SYMBOL}_{field}` for every symbol and field.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(1 + self.symbols.len() * FIELD_NAMES.len());
        names.push("open_time".to_string());
        for symbol in &self.symbols {
            for field in FIELD_NAMES {
                names.push(format!("{symbol}_{field}"));
            }
        }
        names
    }

    /// Column index of `symbol` in each row's `candles`.
    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Full outer join of `self` with one more symbol's series.
    fn join(self, symbol: String, series: Series) -> Self {
        let width = self.symbols.len();
        let mut symbols = self.symbols;
        symbols.push(symbol);

        let mut rows = Vec::with_capacity(self.rows.len().max(series.len()));
        let mut left = self.rows.into_iter().peekable();
        let mut right = series.into_candles().into_iter().peekable();

        loop {
            let order = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.open_time.cmp(&r.open_time),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            match order {
                Ordering::Less => {
                    if let Some(mut row) = left.next() {
                        row.candles.push(None);
                        rows.push(row);
                    }
                }
                Ordering::Greater => {
                    if let Some(c) = right.next() {
                        let mut candles = vec![None; width];
                        let open_time = c.open_time;
                        candles.push(Some(c));
                        rows.push(MergedRow { open_time, candles });
                    }
                }
                Ordering::Equal => {
                    if let (Some(mut row), Some(c)) = (left.next(), right.next()) {
                        row.candles.push(Some(c));
                        rows.push(row);
                    }
                }
            }
        }

        Self { symbols, rows }
    }
}

/// Outer-join every `(symbol, series)` on `open_time`, rows ascending.
pub fn merge(series_list: Vec<(String, Series)>) -> Result<MergedDataset, MergeError> {
    let mut iter = series_list.into_iter();
    let (symbol, series) = iter.next().ok_or(MergeError::NoInputs)?;
    let mut merged = MergedDataset::from_series(symbol, series);

    for (symbol, series) in iter {
        if merged.symbol_index(&symbol).is_some() {
            return Err(MergeError::DuplicateSymbol(symbol));
        }
        merged = merged.join(symbol, series);
    }

    merged.rows.sort_by_key(|r| r.open_time);
    Ok(merged)
}
