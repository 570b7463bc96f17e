//! Extraction pipeline: config → jobs → orchestrated run → merge → export.
//!
//! Progress lives on disk under the config's `checkpoint_dir` and
//! `staging_dir`, so a failed or interrupted run can simply be started
//! again with the same config.

use std::sync::Arc;

use anyhow::{Context, Result};
use candlevault_core::data::{BinanceProvider, CandleProvider, CircuitBreaker};
use candlevault_core::extract::{
    CancelToken, CheckpointStatus, CheckpointStore, ExtractionObserver, FileCheckpointStore,
    FileSeriesStore, Orchestrator, RunReport, SeriesStore,
};

use crate::config::ExtractConfig;
use crate::export::{write_dataset, Manifest};

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Drop checkpoints and staged rows first, forcing a full re-extraction.
    pub reset: bool,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub succeeded: usize,
    pub manifest: Manifest,
}

pub fn checkpoint_store(config: &ExtractConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(&config.checkpoint_dir)
}

pub fn staging_store(config: &ExtractConfig) -> FileSeriesStore {
    FileSeriesStore::new(&config.staging_dir)
}

/// Blocking Binance client with the default circuit breaker.
pub fn binance_provider(config: &ExtractConfig) -> Result<BinanceProvider> {
    BinanceProvider::new(
        config.base_url.clone(),
        Arc::new(CircuitBreaker::default_provider()),
    )
    .context("failed to build HTTP client")
}

/// Delete checkpoints and staged rows for `symbols` (upper-cased) at the
/// configured interval.
pub fn reset_symbols(config: &ExtractConfig, symbols: &[String]) -> Result<()> {
    let interval = config.parsed_interval()?;
    let checkpoints = checkpoint_store(config);
    let staging = staging_store(config);
    for symbol in symbols {
        let symbol = symbol.trim().to_ascii_uppercase();
        checkpoints.reset(&symbol, interval)?;
        staging.clear(&symbol, interval)?;
        tracing::info!(%symbol, %interval, "checkpoint reset");
    }
    Ok(())
}

/// Resume point of every configured symbol at the configured interval.
pub fn checkpoint_status(config: &ExtractConfig) -> Result<Vec<CheckpointStatus>> {
    let interval = config.parsed_interval()?;
    let symbols = config.normalized_symbols();
    let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
    Ok(checkpoint_store(config).status(&refs, interval))
}

/// Run every configured symbol and return the per-symbol report without
/// merging.
pub fn extract(
    config: &ExtractConfig,
    provider: &dyn CandleProvider,
    observer: &dyn ExtractionObserver,
    options: &PipelineOptions,
) -> Result<RunReport> {
    let jobs = config.jobs()?;
    if options.reset {
        reset_symbols(config, &config.normalized_symbols())?;
    }

    let checkpoints = checkpoint_store(config);
    let staging = staging_store(config);
    let orchestrator = Orchestrator::new(provider, &checkpoints, &staging)
        .with_observer(observer)
        .with_settings(config.settings())
        .with_cancel(options.cancel.clone());

    tracing::info!(
        provider = provider.name(),
        symbols = jobs.len(),
        parallel = config.parallel,
        "extraction run starting"
    );
    Ok(orchestrator.run(&jobs))
}

/// Extract, merge and export. Fails without writing any dataset when a
/// symbol did not complete.
pub fn run_extraction(
    config: &ExtractConfig,
    provider: &dyn CandleProvider,
    observer: &dyn ExtractionObserver,
    options: &PipelineOptions,
) -> Result<PipelineOutcome> {
    let report = extract(config, provider, observer, options)?;
    let succeeded = report.succeeded();
    let dataset = report.merge()?;

    let manifest = write_dataset(&dataset, config)?;
    tracing::info!(
        rows = manifest.rows,
        columns = manifest.columns,
        output = %config.output.display(),
        blake3 = %manifest.blake3,
        "dataset written"
    );
    Ok(PipelineOutcome {
        succeeded,
        manifest,
    })
}
