//! Per-symbol candle series.

use super::candle::Candle;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Candles for one symbol, strictly ascending by `open_time`.
///
/// Every constructor and mutator keeps the series sorted with no two candles
/// sharing an `open_time`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    candles: Vec<Candle>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from candles in any order. When two candles share an
    /// `open_time` the later one in the input wins.
    pub fn from_candles(candles: impl IntoIterator<Item = Candle>) -> Self {
        let keyed: BTreeMap<DateTime<Utc>, Candle> =
            candles.into_iter().map(|c| (c.open_time, c)).collect();
        Self {
            candles: keyed.into_values().collect(),
        }
    }

    /// Replace everything at or after `from` with `batch`.
    ///
    /// A batch that is fetched a second time (after a crash between fetch and
    /// checkpoint) overwrites its earlier copy instead of duplicating it.
    /// Candles in `batch` earlier than `from` are ignored.
    pub fn replace_from(&mut self, from: DateTime<Utc>, batch: Vec<Candle>) {
        self.truncate_from(from);
        let tail = Series::from_candles(batch.into_iter().filter(|c| c.open_time >= from));
        self.candles.extend(tail.candles);
    }

    /// Drop every candle at or after `from`. Returns how many were dropped.
    pub fn truncate_from(&mut self, from: DateTime<Utc>) -> usize {
        let cut = self.candles.partition_point(|c| c.open_time < from);
        let dropped = self.candles.len() - cut;
        self.candles.truncate(cut);
        dropped
    }

    /// Keep only candles with `from <= open_time < until`.
    pub fn retain_within(&mut self, from: DateTime<Utc>, until: DateTime<Utc>) {
        self.candles
            .retain(|c| c.open_time >= from && c.open_time < until);
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}
