//! Dataset export: CSV or Parquet, plus a JSON manifest.
//!
//! Layout next to the configured output path:
//! - `{output}`: the merged dataset, written atomically (tmp + rename)
//! - `{output}.manifest.json`: symbols, range, row count and BLAKE3 hash
//!   of the dataset bytes
//!
//! Columns are `open_time`, then `{SYMBOL}_{field}` per symbol in config
//! order. Cells for a symbol with no candle at a timestamp are empty in CSV
//! and null in Parquet.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candlevault_core::domain::{Candle, FIELD_NAMES};
use candlevault_core::extract::{write_atomic, MergedDataset};
use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ExtractConfig, OutputFormat};

/// Written alongside every exported dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub symbols: Vec<String>,
    pub interval: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: usize,
    pub columns: usize,
    pub format: OutputFormat,
    /// BLAKE3 of the dataset file, hex.
    pub blake3: String,
    pub created_at: DateTime<Utc>,
}

pub fn manifest_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".manifest.json");
    PathBuf::from(name)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Render the dataset as CSV with a header row.
pub fn dataset_to_csv(dataset: &MergedDataset) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(dataset.column_names())?;

    let blank: [String; 11] = Default::default();
    for row in &dataset.rows {
        let mut record = Vec::with_capacity(1 + row.candles.len() * FIELD_NAMES.len());
        record.push(row.open_time.to_rfc3339());
        for candle in &row.candles {
            match candle {
                Some(c) => record.extend(c.field_strings()),
                None => record.extend(blank.iter().cloned()),
            }
        }
        wtr.write_record(&record)?;
    }

    wtr.into_inner().context("failed to flush CSV writer")
}

// ─── Parquet ────────────────────────────────────────────────────────

fn millis_column(name: String, values: Vec<Option<i64>>) -> Result<Column> {
    Column::new(name.into(), values)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .context("timestamp cast")
}

fn float_column(
    name: String,
    candles: &[Option<&Candle>],
    field: impl Fn(&Candle) -> Option<f64>,
) -> Column {
    let values: Vec<Option<f64>> = candles.iter().map(|c| c.and_then(&field)).collect();
    Column::new(name.into(), values)
}

/// Build a typed frame: timestamps as `Datetime(ms)`, prices and volumes as
/// `f64`, trade counts as `u64`.
pub fn dataset_to_dataframe(dataset: &MergedDataset) -> Result<DataFrame> {
    let keys: Vec<Option<i64>> = dataset
        .rows
        .iter()
        .map(|r| Some(r.open_time.timestamp_millis()))
        .collect();
    let mut columns = vec![millis_column("open_time".into(), keys)?];

    for (i, symbol) in dataset.symbols.iter().enumerate() {
        let candles: Vec<Option<&Candle>> = dataset
            .rows
            .iter()
            .map(|r| r.candles.get(i).and_then(|c| c.as_ref()))
            .collect();
        let name = |field: &str| format!("{symbol}_{field}");

        columns.push(millis_column(
            name("open_time"),
            candles
                .iter()
                .map(|c| c.map(|c| c.open_time.timestamp_millis()))
                .collect(),
        )?);
        columns.push(float_column(name("open"), &candles, |c| c.open));
        columns.push(float_column(name("high"), &candles, |c| c.high));
        columns.push(float_column(name("low"), &candles, |c| c.low));
        columns.push(float_column(name("close"), &candles, |c| c.close));
        columns.push(float_column(name("volume"), &candles, |c| c.volume));
        columns.push(millis_column(
            name("close_time"),
            candles
                .iter()
                .map(|c| c.and_then(|c| c.close_time).map(|t| t.timestamp_millis()))
                .collect(),
        )?);
        columns.push(float_column(name("quote_volume"), &candles, |c| c.quote_volume));
        let trades: Vec<Option<u64>> = candles
            .iter()
            .map(|c| c.and_then(|c| c.trade_count))
            .collect();
        columns.push(Column::new(name("trade_count").into(), trades));
        columns.push(float_column(name("taker_buy_base_volume"), &candles, |c| {
            c.taker_buy_base_volume
        }));
        columns.push(float_column(name("taker_buy_quote_volume"), &candles, |c| {
            c.taker_buy_quote_volume
        }));
    }

    DataFrame::new(columns).context("dataframe creation")
}

pub fn dataset_to_parquet(dataset: &MergedDataset) -> Result<Vec<u8>> {
    let mut df = dataset_to_dataframe(dataset)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .finish(&mut df)
        .context("write parquet")?;
    Ok(buf)
}

// ─── Output bundle ──────────────────────────────────────────────────

pub fn encode(dataset: &MergedDataset, format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Csv => dataset_to_csv(dataset),
        OutputFormat::Parquet => dataset_to_parquet(dataset),
    }
}

/// Write the dataset and its manifest to the config's output path.
pub fn write_dataset(dataset: &MergedDataset, config: &ExtractConfig) -> Result<Manifest> {
    let format = config.output_format();
    let bytes = encode(dataset, format)?;
    write_atomic(&config.output, &bytes)
        .with_context(|| format!("failed to write {}", config.output.display()))?;

    let manifest = Manifest {
        symbols: dataset.symbols.clone(),
        interval: config.interval.clone(),
        start: config.start,
        end: config.end,
        rows: dataset.len(),
        columns: dataset.column_names().len(),
        format,
        blake3: blake3::hash(&bytes).to_hex().to_string(),
        created_at: Utc::now(),
    };
    let path = manifest_path(&config.output);
    let json = serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;
    write_atomic(&path, &json).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(manifest)
}
