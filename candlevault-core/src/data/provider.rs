//! Candle provider trait and structured provider errors.
//!
//! The `CandleProvider` trait abstracts over the remote data source so the
//! extraction engine can be driven by the Binance client in production and by
//! scripted providers in tests.

use crate::domain::Interval;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// One provider row: 12 positional fields (open time ms, open, high, low,
/// close, volume, close time ms, quote volume, trade count, taker-buy base
/// volume, taker-buy quote volume, unused). Numbers may arrive as JSON
/// numbers or numeric strings.
pub type RawRow = Vec<serde_json::Value>;

/// Errors a provider can raise for a single request.
///
/// `is_transient` splits them into the retryable and non-retryable halves.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("provider has blocked this client: HTTP {status}")]
    IpBanned { status: u16 },

    #[error("hard stop: circuit breaker is open ({remaining_secs}s cooldown left)")]
    CircuitOpen { remaining_secs: u64 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("request rejected: {0}")]
    BadRequest(String),

    #[error("response format changed: {0}")]
    ResponseFormat(String),
}

impl ProviderError {
    /// Whether retrying the same request later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::NetworkUnreachable(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::ServerError { .. }
        )
    }

    /// Minimum wait the provider asked for before the next request.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Remote source of historical candles.
///
/// Implementations own transport, authentication and pagination inside one
/// window. They know nothing about batching, checkpoints or retries.
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch raw rows for `[start, end)`. Blocks until the response arrives
    /// or the transport times out.
    fn get_historical_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ProviderError>;

    /// False while the provider refuses requests (circuit breaker open).
    fn is_available(&self) -> bool {
        true
    }
}
