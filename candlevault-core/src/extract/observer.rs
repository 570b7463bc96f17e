//! Extraction events.
//!
//! The engine reports what it is doing through `ExtractionObserver` and never
//! configures logging itself. `TracingObserver` turns events into structured
//! `tracing` records; `NullObserver` drops them.

use super::error::ExtractError;
use super::range::Window;
use super::validate::TimeGapWarning;
use crate::data::ProviderError;
use crate::domain::ExtractionJob;
use chrono::NaiveDate;
use std::time::Duration;

/// Callbacks for one run. Every method defaults to a no-op.
pub trait ExtractionObserver: Send + Sync {
    fn on_symbol_start(&self, _job: &ExtractionJob) {}

    /// Resume point computed: `staged` rows reloaded, `batches` left to fetch.
    fn on_resume(&self, _symbol: &str, _effective_start: NaiveDate, _staged: usize, _batches: usize) {
    }

    fn on_batch_start(&self, _symbol: &str, _window: Window, _index: usize, _total: usize) {}

    fn on_batch_retry(
        &self,
        _symbol: &str,
        _window: Window,
        _attempt: u32,
        _cause: &ProviderError,
        _delay: Duration,
    ) {
    }

    /// Rows in a response had no usable open time.
    fn on_rows_dropped(&self, _symbol: &str, _window: Window, _dropped: usize) {}

    fn on_batch_success(&self, _symbol: &str, _window: Window, _rows: usize) {}

    fn on_validation_warning(&self, _symbol: &str, _warning: &TimeGapWarning) {}

    fn on_symbol_done(&self, _symbol: &str, _rows: usize) {}

    fn on_symbol_failed(&self, _symbol: &str, _error: &ExtractError) {}

    fn on_run_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ExtractionObserver for NullObserver {}

/// `tracing` target of every extraction event.
pub const LOG_TARGET: &str = "candlevault";

/// Emits every event as a `tracing` record under [`LOG_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ExtractionObserver for TracingObserver {
    fn on_symbol_start(&self, job: &ExtractionJob) {
        tracing::info!(
            target: LOG_TARGET,
            symbol = %job.symbol,
            interval = %job.interval,
            start = %job.start,
            end = %job.end,
            "starting extraction"
        );
    }

    fn on_resume(&self, symbol: &str, effective_start: NaiveDate, staged: usize, batches: usize) {
        tracing::info!(
            target: LOG_TARGET,
            %symbol,
            %effective_start,
            staged,
            batches,
            "resume point"
        );
    }

    fn on_batch_start(&self, symbol: &str, window: Window, index: usize, total: usize) {
        tracing::debug!(
            target: LOG_TARGET,
            %symbol,
            window_start = %window.start,
            window_end = %window.end,
            "batch {}/{}",
            index + 1,
            total
        );
    }

    fn on_batch_retry(
        &self,
        symbol: &str,
        window: Window,
        attempt: u32,
        cause: &ProviderError,
        delay: Duration,
    ) {
        tracing::warn!(
            target: LOG_TARGET,
            %symbol,
            window_start = %window.start,
            window_end = %window.end,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "transient failure, retrying"
        );
    }

    fn on_rows_dropped(&self, symbol: &str, window: Window, dropped: usize) {
        tracing::warn!(
            target: LOG_TARGET,
            %symbol,
            window = %window,
            dropped,
            "rows without open time dropped"
        );
    }

    fn on_batch_success(&self, symbol: &str, window: Window, rows: usize) {
        tracing::info!(
            target: LOG_TARGET,
            %symbol,
            window_start = %window.start,
            window_end = %window.end,
            rows,
            "batch stored"
        );
    }

    fn on_validation_warning(&self, symbol: &str, warning: &TimeGapWarning) {
        tracing::warn!(target: LOG_TARGET, %symbol, "{warning}");
    }

    fn on_symbol_done(&self, symbol: &str, rows: usize) {
        tracing::info!(target: LOG_TARGET, %symbol, rows, "extraction complete");
    }

    fn on_symbol_failed(&self, symbol: &str, error: &ExtractError) {
        tracing::error!(target: LOG_TARGET, %symbol, %error, "extraction failed");
    }

    fn on_run_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(target: LOG_TARGET, succeeded, failed, total, "run complete");
    }
}
