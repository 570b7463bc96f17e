//! Extraction orchestrator: resume, fetch every window, validate, merge.
//!
//! Per symbol the engine walks `Pending → Resuming → Fetching(i) →
//! Validating → Done | Failed`. Each fetched batch is staged and only then
//! checkpointed, so an interrupted run resumes without losing or doubling
//! rows. Symbols are independent; `run` may process them on the rayon pool.

use super::checkpoint::CheckpointStore;
use super::error::{ExtractError, RunError, StoreError};
use super::fetcher::{BatchFetcher, RetryPolicy, Sleeper, ThreadSleeper};
use super::merge::{merge, MergedDataset};
use super::observer::{ExtractionObserver, NullObserver};
use super::range::{midnight, partition, RangeError};
use super::staging::SeriesStore;
use super::validate::{validate, TimeGapWarning, ValidationReport};
use crate::data::CandleProvider;
use crate::domain::{ExtractionJob, Series};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolState {
    Pending,
    Resuming,
    /// Zero-based index of the batch being fetched.
    Fetching(usize),
    Validating,
    Done,
    Failed,
}

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub backoff_base: Duration,
    /// Pause after every successful batch.
    pub request_delay: Duration,
    pub parallel: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(1000),
            request_delay: Duration::from_millis(500),
            parallel: false,
        }
    }
}

/// Where one symbol ended up.
///
/// `series` holds whatever was accumulated, also when the symbol failed:
/// partial data is kept for diagnosis, though it is never merged.
#[derive(Debug)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub state: SymbolState,
    pub series: Series,
    pub result: Result<ValidationReport, ExtractError>,
    pub batches_fetched: usize,
    /// Checkpoint found when the symbol started, if any.
    pub resumed_from: Option<NaiveDate>,
}

impl SymbolOutcome {
    pub fn is_done(&self) -> bool {
        self.state == SymbolState::Done
    }

    pub fn warnings(&self) -> &[TimeGapWarning] {
        match &self.result {
            Ok(report) => &report.warnings,
            Err(_) => &[],
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// One outcome per job, in job order.
    pub outcomes: Vec<SymbolOutcome>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// `(symbol, reason)` for every failed symbol.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Err(e) => Some((o.symbol.clone(), e.to_string())),
                Ok(_) if !o.is_done() => Some((o.symbol.clone(), "not completed".into())),
                Ok(_) => None,
            })
            .collect()
    }

    /// Merge every symbol's series. Refuses when any symbol failed.
    pub fn merge(self) -> Result<MergedDataset, RunError> {
        if !self.all_succeeded() {
            return Err(RunError::SymbolsFailed {
                total: self.outcomes.len(),
                failures: self.failures(),
            });
        }
        let inputs = self
            .outcomes
            .into_iter()
            .map(|o| (o.symbol, o.series))
            .collect();
        Ok(merge(inputs)?)
    }
}

/// Mutable per-symbol progress while the state machine runs.
struct Progress {
    state: SymbolState,
    series: Series,
    batches_fetched: usize,
    resumed_from: Option<NaiveDate>,
}

pub struct Orchestrator<'a> {
    provider: &'a dyn CandleProvider,
    checkpoints: &'a dyn CheckpointStore,
    staging: &'a dyn SeriesStore,
    observer: &'a dyn ExtractionObserver,
    sleeper: &'a dyn Sleeper,
    settings: OrchestratorSettings,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        provider: &'a dyn CandleProvider,
        checkpoints: &'a dyn CheckpointStore,
        staging: &'a dyn SeriesStore,
    ) -> Self {
        Self {
            provider,
            checkpoints,
            staging,
            observer: &NullObserver,
            sleeper: &ThreadSleeper,
            settings: OrchestratorSettings::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn ExtractionObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Extract every job, then report. Never merges; see `RunReport::merge`.
    pub fn run(&self, jobs: &[ExtractionJob]) -> RunReport {
        let outcomes: Vec<SymbolOutcome> = if self.settings.parallel {
            jobs.par_iter().map(|job| self.extract_symbol(job)).collect()
        } else {
            jobs.iter().map(|job| self.extract_symbol(job)).collect()
        };

        let report = RunReport { outcomes };
        self.observer
            .on_run_complete(report.succeeded(), report.failed(), jobs.len());
        report
    }

    /// Run one symbol's state machine to `Done` or `Failed`.
    pub fn extract_symbol(&self, job: &ExtractionJob) -> SymbolOutcome {
        self.observer.on_symbol_start(job);

        let mut progress = Progress {
            state: SymbolState::Pending,
            series: Series::new(),
            batches_fetched: 0,
            resumed_from: None,
        };
        let result = self.drive(job, &mut progress);

        match &result {
            Ok(report) => {
                for warning in &report.warnings {
                    self.observer.on_validation_warning(&job.symbol, warning);
                }
                progress.state = SymbolState::Done;
                self.observer.on_symbol_done(&job.symbol, report.rows);
            }
            Err(e) => {
                progress.state = SymbolState::Failed;
                self.observer.on_symbol_failed(&job.symbol, e);
            }
        }

        SymbolOutcome {
            symbol: job.symbol.clone(),
            state: progress.state,
            series: progress.series,
            result,
            batches_fetched: progress.batches_fetched,
            resumed_from: progress.resumed_from,
        }
    }

    fn drive(
        &self,
        job: &ExtractionJob,
        progress: &mut Progress,
    ) -> Result<ValidationReport, ExtractError> {
        let symbol = job.symbol.as_str();
        let store_err = |source: StoreError| ExtractError::Store {
            symbol: symbol.to_string(),
            source,
        };

        if job.start >= job.end {
            return Err(RangeError::EmptyRange {
                start: job.start,
                end: job.end,
            }
            .into());
        }

        progress.state = SymbolState::Resuming;
        let checkpoint = self.checkpoints.resume_date(symbol, job.interval);
        let effective_start = job.effective_start(checkpoint);
        progress.resumed_from = checkpoint;

        // Without a checkpoint nothing staged is confirmed. With one, rows at
        // or after the resume point belong to a batch that never committed.
        progress.series = match checkpoint {
            None => {
                self.staging.clear(symbol, job.interval).map_err(store_err)?;
                Series::new()
            }
            Some(_) => {
                let mut staged = self.staging.load(symbol, job.interval);
                if staged.truncate_from(midnight(effective_start)) > 0 {
                    self.staging
                        .rewrite(symbol, job.interval, &staged)
                        .map_err(store_err)?;
                }
                staged
            }
        };

        let windows = if effective_start >= job.end {
            Vec::new()
        } else {
            partition(effective_start, job.end, i64::from(job.batch_size_days))?
        };
        self.observer
            .on_resume(symbol, effective_start, progress.series.len(), windows.len());

        let fetcher = BatchFetcher::new(
            self.provider,
            self.sleeper,
            self.observer,
            self.settings.request_delay,
        );
        let policy = RetryPolicy::new(job.max_retries, self.settings.backoff_base);
        let total = windows.len();

        for (index, window) in windows.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ExtractError::Cancelled {
                    symbol: symbol.to_string(),
                    next: window,
                });
            }

            progress.state = SymbolState::Fetching(index);
            self.observer.on_batch_start(symbol, window, index, total);

            let candles = fetcher
                .fetch_batch(symbol, job.interval, window, &policy)?
                .into_candles();
            let rows = candles.len();

            self.staging
                .append(symbol, job.interval, &candles)
                .map_err(store_err)?;
            self.checkpoints
                .save(symbol, job.interval, window.end)
                .map_err(store_err)?;
            progress.series.replace_from(midnight(window.start), candles);
            progress.batches_fetched += 1;

            self.observer.on_batch_success(symbol, window, rows);
        }

        progress.state = SymbolState::Validating;
        progress
            .series
            .retain_within(midnight(job.start), midnight(job.end));
        validate(&progress.series, job.interval, job.start, job.end).map_err(|source| {
            ExtractError::Validation {
                symbol: symbol.to_string(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ProviderError, RawRow};
    use crate::domain::Interval;
    use crate::extract::checkpoint::MemoryCheckpointStore;
    use crate::extract::range::Window;
    use crate::extract::staging::MemorySeriesStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves one full daily candle per day of the requested window.
    #[derive(Default)]
    struct DailyProvider {
        calls: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    impl CandleProvider for DailyProvider {
        fn name(&self) -> &str {
            "daily"
        }

        fn get_historical_candles(
            &self,
            _symbol: &str,
            _interval: Interval,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<RawRow>, ProviderError> {
            self.calls.lock().unwrap().push((start, end));
            let first = midnight(start).timestamp_millis();
            Ok((0..(end - start).num_days())
                .map(|i| {
                    let t = first + i * 86_400_000;
                    vec![
                        json!(t),
                        json!("1"),
                        json!("2"),
                        json!("0.5"),
                        json!("1.5"),
                        json!("10"),
                        json!(t + 86_399_999),
                        json!("15"),
                        json!(3),
                        json!("4"),
                        json!("6"),
                        json!("0"),
                    ]
                })
                .collect())
        }
    }

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, m, day).unwrap()
    }

    fn job(symbol: &str) -> ExtractionJob {
        ExtractionJob {
            symbol: symbol.into(),
            interval: Interval::Day1,
            start: d(1, 1),
            end: d(3, 1),
            batch_size_days: 30,
            max_retries: 2,
        }
    }

    #[test]
    fn fresh_symbol_runs_to_done() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);

        let outcome = orch.extract_symbol(&job("BTCUSDT"));
        assert_eq!(outcome.state, SymbolState::Done);
        assert_eq!(outcome.batches_fetched, 2);
        assert_eq!(outcome.series.len(), 59);
        assert_eq!(outcome.resumed_from, None);
        assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(3, 1)));
        assert_eq!(staging.load("BTCUSDT", Interval::Day1).len(), 59);
    }

    #[test]
    fn resumes_from_checkpoint_window() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        checkpoints.save("BTCUSDT", Interval::Day1, d(2, 1)).unwrap();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);

        let outcome = orch.extract_symbol(&job("BTCUSDT"));
        assert_eq!(*provider.calls.lock().unwrap(), vec![(d(2, 1), d(3, 1))]);
        assert_eq!(outcome.resumed_from, Some(d(2, 1)));
        // nothing staged for January, so coverage fails
        assert_eq!(outcome.state, SymbolState::Failed);
        assert!(matches!(outcome.result, Err(ExtractError::Validation { .. })));
        assert_eq!(outcome.series.len(), 28);
    }

    #[test]
    fn completed_job_skips_fetching() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);
        assert!(orch.extract_symbol(&job("BTCUSDT")).is_done());

        provider.calls.lock().unwrap().clear();
        let again = orch.extract_symbol(&job("BTCUSDT"));
        assert!(again.is_done());
        assert_eq!(again.batches_fetched, 0);
        assert_eq!(again.series.len(), 59);
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn inverted_range_fails_before_any_fetch() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);

        let mut bad = job("BTCUSDT");
        bad.end = bad.start;
        let outcome = orch.extract_symbol(&bad);
        assert_eq!(outcome.state, SymbolState::Failed);
        assert!(matches!(outcome.result, Err(ExtractError::Range(_))));
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancelled_token_stops_before_first_batch() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging)
            .with_sleeper(&NoSleep)
            .with_cancel(cancel);

        let outcome = orch.extract_symbol(&job("BTCUSDT"));
        match outcome.result {
            Err(ExtractError::Cancelled { next, .. }) => assert_eq!(next.start, d(1, 1)),
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), None);
    }

    #[test]
    fn report_merges_only_when_all_done() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);

        let report = orch.run(&[job("BTCUSDT"), job("ETHUSDT")]);
        assert_eq!(report.succeeded(), 2);
        let merged = report.merge().unwrap();
        assert_eq!(merged.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(merged.len(), 59);

        let mut bad = job("XRPUSDT");
        bad.end = bad.start;
        let report = orch.run(&[job("BTCUSDT"), bad]);
        match report.merge() {
            Err(RunError::SymbolsFailed { total, failures }) => {
                assert_eq!(total, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "XRPUSDT");
            }
            other => panic!("expected SymbolsFailed, got {other:?}"),
        }
    }

    #[test]
    fn checkpoint_before_job_start_is_ignored() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        checkpoints
            .save("BTCUSDT", Interval::Day1, d(1, 1) - ChronoDuration::days(40))
            .unwrap();
        let staging = MemorySeriesStore::new();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging).with_sleeper(&NoSleep);

        let outcome = orch.extract_symbol(&job("BTCUSDT"));
        assert!(outcome.is_done());
        assert_eq!(provider.calls.lock().unwrap()[0].0, d(1, 1));
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ExtractionObserver for Recorder {
        fn on_symbol_start(&self, job: &ExtractionJob) {
            self.events.lock().unwrap().push(format!("start {}", job.symbol));
        }

        fn on_resume(&self, _symbol: &str, start: NaiveDate, staged: usize, batches: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("resume {start} {staged} {batches}"));
        }

        fn on_batch_success(&self, _symbol: &str, window: Window, rows: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("batch {} {rows}", window.start));
        }

        fn on_symbol_done(&self, symbol: &str, rows: usize) {
            self.events.lock().unwrap().push(format!("done {symbol} {rows}"));
        }

        fn on_run_complete(&self, succeeded: usize, failed: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("run {succeeded}/{total} failed={failed}"));
        }
    }

    #[test]
    fn observer_sees_events_in_order() {
        let provider = DailyProvider::default();
        let checkpoints = MemoryCheckpointStore::new();
        let staging = MemorySeriesStore::new();
        let recorder = Recorder::default();
        let orch = Orchestrator::new(&provider, &checkpoints, &staging)
            .with_sleeper(&NoSleep)
            .with_observer(&recorder);

        orch.run(&[job("BTCUSDT")]);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                "start BTCUSDT",
                "resume 2017-01-01 0 2",
                "batch 2017-01-01 30",
                "batch 2017-01-31 29",
                "done BTCUSDT 59",
                "run 1/1 failed=0",
            ]
        );
    }
}
