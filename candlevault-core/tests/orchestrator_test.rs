//! End-to-end extraction scenarios against a synthetic provider.
//!
//! Covers resume after failure, crash between staging and checkpoint,
//! per-interval checkpoints, monthly bars, retry exhaustion blocking the
//! merge, cancellation and parallel runs.

use candlevault_core::data::{CandleProvider, ProviderError, RawRow};
use candlevault_core::domain::{ExtractionJob, Interval};
use candlevault_core::extract::{
    midnight, BatchError, CancelToken, CheckpointStore, ExtractError, FileCheckpointStore,
    FileSeriesStore, MemoryCheckpointStore, MemorySeriesStore, MergedDataset, Orchestrator,
    OrchestratorSettings, RunError, SeriesStore, Sleeper, SymbolState,
};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────

fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2017, m, day).unwrap()
}

/// Daily candles for each requested day, with prices derived from the
/// symbol and date so different symbols stay distinguishable.
#[derive(Default)]
struct Synthetic {
    /// Window start → error returned for every call on that window.
    failures: Mutex<HashMap<NaiveDate, ProviderError>>,
    /// Days with no candle (provider outage).
    missing: HashSet<NaiveDate>,
    calls: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
    /// Cancelled on the first call.
    cancel_on_call: Option<CancelToken>,
}

impl Synthetic {
    fn failing_at(window_start: NaiveDate, err: ProviderError) -> Self {
        let s = Self::default();
        s.failures.lock().unwrap().insert(window_start, err);
        s
    }

    fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn windows_for(&self, symbol: &str) -> Vec<(NaiveDate, NaiveDate)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == symbol)
            .map(|(_, a, b)| (*a, *b))
            .collect()
    }
}

fn price(symbol: &str, day: i64) -> f64 {
    let offset = symbol.bytes().map(f64::from).sum::<f64>();
    offset + day as f64
}

impl CandleProvider for Synthetic {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn get_historical_candles(
        &self,
        symbol: &str,
        _interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), start, end));
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if let Some(err) = self.failures.lock().unwrap().get(&start) {
            return Err(err.clone());
        }

        let mut rows = Vec::new();
        let mut day = start;
        while day < end {
            if !self.missing.contains(&day) {
                let t = midnight(day).timestamp_millis();
                let p = price(symbol, (day - d(1, 1)).num_days());
                rows.push(vec![
                    json!(t),
                    json!(p.to_string()),
                    json!((p + 2.0).to_string()),
                    json!((p - 1.0).to_string()),
                    json!((p + 1.0).to_string()),
                    json!("100.5"),
                    json!(t + 86_399_999),
                    json!("12000"),
                    json!(42),
                    json!("40.25"),
                    json!("4800"),
                    json!("0"),
                ]);
            }
            day += ChronoDuration::days(1);
        }
        Ok(rows)
    }
}

/// One bar on the 1st of every month, like a `1M` kline feed.
#[derive(Default)]
struct Monthly {
    calls: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

impl CandleProvider for Monthly {
    fn name(&self) -> &str {
        "monthly"
    }

    fn get_historical_candles(
        &self,
        _symbol: &str,
        _interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRow>, ProviderError> {
        self.calls.lock().unwrap().push((start, end));
        let mut rows = Vec::new();
        let mut day = start;
        while day < end {
            if day.day() == 1 {
                let t = midnight(day).timestamp_millis();
                rows.push(vec![
                    json!(t),
                    json!("100"),
                    json!("120"),
                    json!("90"),
                    json!("110"),
                    json!("5000"),
                    json!(t + 27 * 86_400_000),
                    json!("550000"),
                    json!(900),
                    json!("2500"),
                    json!("275000"),
                    json!("0"),
                ]);
            }
            day += ChronoDuration::days(1);
        }
        Ok(rows)
    }
}

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
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

fn settings(parallel: bool) -> OrchestratorSettings {
    OrchestratorSettings {
        backoff_base: Duration::from_millis(1),
        request_delay: Duration::ZERO,
        parallel,
    }
}

/// Uninterrupted run over fresh in-memory stores.
fn baseline(jobs: &[ExtractionJob]) -> MergedDataset {
    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false))
        .run(jobs)
        .merge()
        .unwrap()
}

// ── Resume ───────────────────────────────────────────────────────────

#[test]
fn resumes_from_checkpoint_and_fetches_only_remaining_window() {
    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    // first run completes January only
    let mut january = job("BTCUSDT");
    january.end = d(2, 1);
    assert!(orch.extract_symbol(&january).is_done());
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(2, 1)));

    provider.calls.lock().unwrap().clear();
    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert!(outcome.is_done());
    assert_eq!(outcome.resumed_from, Some(d(2, 1)));
    assert_eq!(provider.windows_for("BTCUSDT"), vec![(d(2, 1), d(3, 1))]);
    assert_eq!(outcome.series.len(), 59);
}

#[test]
fn failed_run_then_resume_matches_uninterrupted_run() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = FileCheckpointStore::new(dir.path().join("checkpoints"));
    let staging = FileSeriesStore::new(dir.path().join("staging"));
    let jobs = [job("BTCUSDT"), job("ETHUSDT")];

    let provider = Synthetic::failing_at(d(1, 31), ProviderError::NetworkUnreachable("down".into()));
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let report = orch.run(&jobs);
    assert_eq!(report.failed(), 2);
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, SymbolState::Failed);
        assert_eq!(outcome.batches_fetched, 1);
        // partial data from the first window is kept
        assert_eq!(outcome.series.len(), 30);
    }
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(1, 31)));
    assert!(matches!(report.merge(), Err(RunError::SymbolsFailed { .. })));

    provider.heal();
    provider.calls.lock().unwrap().clear();
    let merged = orch.run(&jobs).merge().unwrap();
    assert_eq!(provider.windows_for("BTCUSDT"), vec![(d(1, 31), d(3, 1))]);
    assert_eq!(merged, baseline(&jobs));
}

#[test]
fn crash_between_staging_and_checkpoint_does_not_duplicate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoints = FileCheckpointStore::new(dir.path().join("checkpoints"));
    let staging = FileSeriesStore::new(dir.path().join("staging"));
    let provider = Synthetic::default();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let mut january = job("BTCUSDT");
    january.end = d(1, 31);
    assert!(orch.extract_symbol(&january).is_done());

    // the second batch reached staging but the process died before the
    // checkpoint advanced
    let orphan = orch.extract_symbol(&ExtractionJob {
        start: d(1, 31),
        ..job("BTCUSDT")
    });
    assert!(orphan.is_done());
    checkpoints.reset("BTCUSDT", Interval::Day1).unwrap();
    checkpoints.save("BTCUSDT", Interval::Day1, d(1, 31)).unwrap();
    assert_eq!(staging.load("BTCUSDT", Interval::Day1).len(), 59);

    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert!(outcome.is_done());
    assert_eq!(outcome.series.len(), 59);
    assert_eq!(staging.load("BTCUSDT", Interval::Day1).len(), 59);

    let jobs = [job("BTCUSDT")];
    let resumed = orch.run(&jobs).merge().unwrap();
    assert_eq!(resumed, baseline(&jobs));
}

#[test]
fn missing_checkpoint_discards_stale_staging() {
    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    assert!(orch.extract_symbol(&job("BTCUSDT")).is_done());
    checkpoints.reset("BTCUSDT", Interval::Day1).unwrap();

    provider.calls.lock().unwrap().clear();
    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert!(outcome.is_done());
    assert_eq!(outcome.batches_fetched, 2);
    assert_eq!(provider.windows_for("BTCUSDT").len(), 2);
    assert_eq!(staging.load("BTCUSDT", Interval::Day1).len(), 59);
}

#[test]
fn checkpoint_from_another_interval_is_not_reused() {
    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    assert!(orch.extract_symbol(&job("BTCUSDT")).is_done());
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(3, 1)));

    provider.calls.lock().unwrap().clear();
    let hourly = ExtractionJob {
        interval: Interval::Hour1,
        ..job("BTCUSDT")
    };
    let outcome = orch.extract_symbol(&hourly);
    assert!(outcome.is_done(), "{:?}", outcome.result);
    assert_eq!(outcome.resumed_from, None);
    assert_eq!(outcome.batches_fetched, 2);
    assert_eq!(provider.windows_for("BTCUSDT")[0].0, d(1, 1));
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Hour1), Some(d(3, 1)));
    // the daily series is untouched
    assert_eq!(staging.load("BTCUSDT", Interval::Day1).len(), 59);
}

// ── Long intervals ───────────────────────────────────────────────────

fn monthly_job(batch_size_days: u32) -> ExtractionJob {
    ExtractionJob {
        symbol: "BTCUSDT".into(),
        interval: Interval::Month1,
        start: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
        batch_size_days,
        max_retries: 0,
    }
}

/// 2017 splits into eleven full 31-day windows and a clipped
/// `[2017-12-08, 2018-01-01)` that holds no monthly open.
#[test]
fn monthly_bars_complete_with_month_long_batches() {
    let provider = Monthly::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let outcome = orch.extract_symbol(&monthly_job(31));
    assert!(outcome.is_done(), "{:?}", outcome.result);
    assert_eq!(outcome.series.len(), 12);
    assert_eq!(outcome.batches_fetched, 12);
    assert_eq!(provider.calls.lock().unwrap().last().unwrap().0, d(12, 8));
    assert_eq!(
        checkpoints.resume_date("BTCUSDT", Interval::Month1),
        NaiveDate::from_ymd_opt(2018, 1, 1)
    );
}

// ── Failure ──────────────────────────────────────────────────────────

#[test]
fn retry_exhaustion_blocks_merge_and_names_window() {
    let provider = Synthetic::failing_at(d(1, 31), ProviderError::ServerError { status: 502 });
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert_eq!(outcome.state, SymbolState::Failed);
    match &outcome.result {
        Err(ExtractError::Batch(BatchError::RetriesExhausted {
            window, attempts, ..
        })) => {
            assert_eq!(window.start, d(1, 31));
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(provider.windows_for("BTCUSDT").len(), 4);
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(1, 31)));
}

#[test]
fn one_failed_symbol_aborts_the_merge() {
    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let mut missing = job("NOPEUSDT");
    missing.start = d(3, 1);
    missing.end = d(3, 1);
    let report = orch.run(&[job("BTCUSDT"), missing]);
    assert_eq!(report.succeeded(), 1);

    let err = report.merge().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("1 of 2 symbols failed"), "{msg}");
    assert!(msg.contains("NOPEUSDT"), "{msg}");
}

#[test]
fn gaps_warn_but_do_not_fail() {
    let provider = Synthetic {
        missing: (10..16).map(|day| d(1, day)).collect(),
        ..Synthetic::default()
    };
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert!(outcome.is_done());
    assert_eq!(outcome.warnings().len(), 1);
    assert_eq!(outcome.warnings()[0].gap, ChronoDuration::days(7));
}

#[test]
fn early_end_fails_validation_with_partial_data() {
    let provider = Synthetic {
        missing: (27..=28).map(|day| d(2, day)).chain((20..27).map(|day| d(2, day))).collect(),
        ..Synthetic::default()
    };
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false));

    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    assert_eq!(outcome.state, SymbolState::Failed);
    assert!(matches!(outcome.result, Err(ExtractError::Validation { .. })));
    assert_eq!(outcome.series.len(), 50);
    // fetching succeeded, so the checkpoint reached the end
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(3, 1)));
}

// ── Cancellation ─────────────────────────────────────────────────────

#[test]
fn cancellation_stops_between_batches() {
    let cancel = CancelToken::new();
    let provider = Synthetic {
        cancel_on_call: Some(cancel.clone()),
        ..Synthetic::default()
    };
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let orch = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(false))
        .with_cancel(cancel);

    let outcome = orch.extract_symbol(&job("BTCUSDT"));
    match &outcome.result {
        Err(ExtractError::Cancelled { next, .. }) => assert_eq!(next.start, d(1, 31)),
        other => panic!("expected Cancelled, got {other:?}"),
    }
    // the in-flight batch still committed
    assert_eq!(outcome.batches_fetched, 1);
    assert_eq!(checkpoints.resume_date("BTCUSDT", Interval::Day1), Some(d(1, 31)));
}

// ── Parallel ─────────────────────────────────────────────────────────

#[test]
fn parallel_run_matches_sequential_run() {
    let jobs: Vec<ExtractionJob> = ["BTCUSDT", "ETHUSDT", "BNBUSDT", "XRPUSDT"]
        .iter()
        .map(|s| job(s))
        .collect();

    let provider = Synthetic::default();
    let checkpoints = MemoryCheckpointStore::new();
    let staging = MemorySeriesStore::new();
    let report = Orchestrator::new(&provider, &checkpoints, &staging)
        .with_sleeper(&NoSleep)
        .with_settings(settings(true))
        .run(&jobs);

    let symbols: Vec<&str> = report.outcomes.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "BNBUSDT", "XRPUSDT"]);
    for j in &jobs {
        assert_eq!(checkpoints.resume_date(&j.symbol, Interval::Day1), Some(d(3, 1)));
    }
    assert_eq!(report.merge().unwrap(), baseline(&jobs));
}
