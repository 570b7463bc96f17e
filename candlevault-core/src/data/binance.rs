//! Binance spot REST provider.
//!
//! Fetches klines from `GET /api/v3/klines`. One call to
//! `get_historical_candles` covers a whole window: the endpoint returns at most
//! 1000 rows per request, so the client pages forward inside the window until
//! it is exhausted. Retries are not done here; the batch fetcher owns them.

use super::circuit_breaker::CircuitBreaker;
use super::normalize;
use super::provider::{CandleProvider, ProviderError, RawRow};
use crate::domain::Interval;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Maximum rows Binance returns per klines request.
const PAGE_LIMIT: usize = 1000;

/// Binance error body: `{"code": -1121, "msg": "Invalid symbol."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    msg: String,
}

const INVALID_SYMBOL: i64 = -1121;

pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceProvider {
    pub fn new(
        base_url: impl Into<String>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("candlevault/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            circuit_breaker,
        })
    }

    fn klines_url(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms_inclusive: i64,
    ) -> String {
        format!(
            "{}/api/v3/klines?symbol={symbol}&interval={interval}\
             &startTime={start_ms}&endTime={end_ms_inclusive}&limit={PAGE_LIMIT}",
            self.base_url
        )
    }

    /// Issue one page request.
    fn fetch_page(&self, url: &str, symbol: &str) -> Result<Vec<RawRow>, ProviderError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(self.circuit_open());
        }

        let resp = self.client.get(url).send().map_err(|e| {
            self.circuit_breaker.record_failure();
            ProviderError::NetworkUnreachable(e.to_string())
        })?;

        let status = resp.status();
        if status.is_success() {
            let rows: Vec<RawRow> = resp.json().map_err(|e| {
                ProviderError::ResponseFormat(format!("klines body for {symbol}: {e}"))
            })?;
            self.circuit_breaker.record_success();
            return Ok(rows);
        }

        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = resp.text().unwrap_or_default();
        let err = classify_status(status.as_u16(), retry_after, &body, symbol);

        match err {
            ProviderError::IpBanned { .. } => self.circuit_breaker.trip(),
            ProviderError::RateLimited { .. } | ProviderError::ServerError { .. } => {
                self.circuit_breaker.record_failure()
            }
            _ => {}
        }
        Err(err)
    }

    fn circuit_open(&self) -> ProviderError {
        ProviderError::CircuitOpen {
            remaining_secs: self.circuit_breaker.remaining_cooldown().as_secs(),
        }
    }
}

/// Map a non-success HTTP status (and Binance error body) to a provider error.
fn classify_status(
    status: u16,
    retry_after: Option<u64>,
    body: &str,
    symbol: &str,
) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        418 | 403 => ProviderError::IpBanned { status },
        500..=599 => ProviderError::ServerError { status },
        _ => match serde_json::from_str::<ErrorBody>(body) {
            Ok(e) if e.code == INVALID_SYMBOL => ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Ok(e) => ProviderError::BadRequest(format!("HTTP {status} ({}): {}", e.code, e.msg)),
            Err(_) => ProviderError::BadRequest(format!("HTTP {status}")),
        },
    }
}

/// Midnight UTC of `date` in epoch milliseconds.
pub(crate) fn date_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

impl CandleProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance_spot"
    }

    fn get_historical_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ProviderError> {
        let end_ms = date_millis(end) - 1;
        let mut cursor = date_millis(start);
        let mut rows: Vec<RawRow> = Vec::new();

        while cursor <= end_ms {
            let url = self.klines_url(symbol, interval, cursor, end_ms);
            let page = self.fetch_page(&url, symbol)?;
            let page_len = page.len();

            let last_open = match page.last() {
                Some(row) => normalize::normalize_row(row)
                    .map(|c| c.open_time.timestamp_millis())
                    .ok_or_else(|| {
                        ProviderError::ResponseFormat(format!(
                            "klines row for {symbol} has no open time"
                        ))
                    })?,
                None => break,
            };
            rows.extend(page);

            if page_len < PAGE_LIMIT || last_open < cursor {
                break;
            }
            cursor = last_open + 1;
        }

        Ok(rows)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
