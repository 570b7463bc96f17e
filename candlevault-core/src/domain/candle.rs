//! Candle (kline) bar type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar as normalized from a provider row.
///
/// `open_time` is the series key and is always present. Every other field is
/// optional: malformed provider values become `None` rather than failing the
/// batch, and the validator decides whether a gap in a required field is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub quote_volume: Option<f64>,
    pub trade_count: Option<u64>,
    pub taker_buy_base_volume: Option<f64>,
    pub taker_buy_quote_volume: Option<f64>,
}

/// Per-candle field names, in output column order (after `open_time`).
pub const FIELD_NAMES: [&str; 11] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_volume",
    "trade_count",
    "taker_buy_base_volume",
    "taker_buy_quote_volume",
];

/// Fields that must be present on every record of a completed series.
pub const REQUIRED_FIELDS: [&str; 6] = ["open", "high", "low", "close", "volume", "close_time"];

impl Candle {
    /// A candle with only its key set.
    pub fn empty(open_time: DateTime<Utc>) -> Self {
        Self {
            open_time,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            close_time: None,
            quote_volume: None,
            trade_count: None,
            taker_buy_base_volume: None,
            taker_buy_quote_volume: None,
        }
    }

    /// Names of required fields that are `None` on this candle.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let present = [
            self.open.is_some(),
            self.high.is_some(),
            self.low.is_some(),
            self.close.is_some(),
            self.volume.is_some(),
            self.close_time.is_some(),
        ];
        REQUIRED_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Field values rendered as text, in `FIELD_NAMES` order. `None` renders
    /// as the empty string.
    pub fn field_strings(&self) -> [String; 11] {
        fn num(v: Option<f64>) -> String {
            v.map(|x| x.to_string()).unwrap_or_default()
        }
        fn ts(v: Option<DateTime<Utc>>) -> String {
            v.map(|t| t.to_rfc3339()).unwrap_or_default()
        }
        [
            self.open_time.to_rfc3339(),
            num(self.open),
            num(self.high),
            num(self.low),
            num(self.close),
            num(self.volume),
            ts(self.close_time),
            num(self.quote_volume),
            self.trade_count.map(|c| c.to_string()).unwrap_or_default(),
            num(self.taker_buy_base_volume),
            num(self.taker_buy_quote_volume),
        ]
    }
}
