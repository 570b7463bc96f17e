//! Batch fetcher: one window through the provider, with bounded retries.
//!
//! Each attempt yields a tagged `AttemptOutcome`. Transient outcomes are
//! retried with linear backoff up to the policy's cap; permanent outcomes and
//! exhausted retries escape as `BatchError`. An empty response for a window
//! of at least one bar is permanent and costs no retry. After every success the
//! fetcher pauses for `request_delay` to stay under the provider's request
//! rate.

use super::error::BatchError;
use super::observer::ExtractionObserver;
use super::range::Window;
use crate::data::{normalize_rows, CandleProvider, ProviderError};
use crate::domain::{Interval, Series};
use std::time::Duration;

/// Bounded linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `attempt` (1-based): `attempt * backoff_base`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }

    /// Backoff for `attempt`, stretched to any wait the provider asked for.
    pub fn delay_after(&self, attempt: u32, cause: &ProviderError) -> Duration {
        let backoff = self.backoff_for(attempt);
        cause.retry_after().map_or(backoff, |ra| ra.max(backoff))
    }
}

/// Blocking pause. Injected so tests can observe backoff without sleeping.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Result of a single provider call.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Series),
    Transient(ProviderError),
    Permanent(BatchError),
}

pub struct BatchFetcher<'a> {
    provider: &'a dyn CandleProvider,
    sleeper: &'a dyn Sleeper,
    observer: &'a dyn ExtractionObserver,
    request_delay: Duration,
}

impl<'a> BatchFetcher<'a> {
    pub fn new(
        provider: &'a dyn CandleProvider,
        sleeper: &'a dyn Sleeper,
        observer: &'a dyn ExtractionObserver,
        request_delay: Duration,
    ) -> Self {
        Self {
            provider,
            sleeper,
            observer,
            request_delay,
        }
    }

    /// One provider call for `window`, classified.
    pub fn attempt(&self, symbol: &str, interval: Interval, window: Window) -> AttemptOutcome {
        let rows = match self
            .provider
            .get_historical_candles(symbol, interval, window.start, window.end)
        {
            Ok(rows) => rows,
            Err(e) if e.is_transient() => return AttemptOutcome::Transient(e),
            Err(cause) => {
                return AttemptOutcome::Permanent(BatchError::Permanent {
                    symbol: symbol.to_string(),
                    window,
                    cause,
                })
            }
        };

        let (from, until) = window.instants();
        let normalized = normalize_rows(&rows, from, until);
        if normalized.dropped > 0 {
            self.observer
                .on_rows_dropped(symbol, window, normalized.dropped);
        }
        if normalized.candles.is_empty() {
            // a window shorter than one bar need not hold a bar open
            if until - from < interval.duration() {
                return AttemptOutcome::Success(Series::new());
            }
            return AttemptOutcome::Permanent(BatchError::EmptyWindow {
                symbol: symbol.to_string(),
                window,
            });
        }
        AttemptOutcome::Success(Series::from_candles(normalized.candles))
    }

    /// Fetch `window` for `symbol`, retrying transient failures per `policy`.
    pub fn fetch_batch(
        &self,
        symbol: &str,
        interval: Interval,
        window: Window,
        policy: &RetryPolicy,
    ) -> Result<Series, BatchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(symbol, interval, window) {
                AttemptOutcome::Success(series) => {
                    self.sleeper.sleep(self.request_delay);
                    return Ok(series);
                }
                AttemptOutcome::Permanent(err) => return Err(err),
                AttemptOutcome::Transient(cause) => {
                    if attempt >= policy.max_attempts() {
                        return Err(BatchError::RetriesExhausted {
                            symbol: symbol.to_string(),
                            window,
                            attempts: attempt,
                            last: cause,
                        });
                    }
                    let delay = policy.delay_after(attempt, &cause);
                    self.observer
                        .on_batch_retry(symbol, window, attempt, &cause, delay);
                    self.sleeper.sleep(delay);
                }
            }
        }
    }
}
