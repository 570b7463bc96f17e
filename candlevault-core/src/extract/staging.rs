//! Staging store: durable per-symbol rows fetched so far.
//!
//! Each successful batch is appended here before its checkpoint is saved, so
//! a resumed run reloads exactly what the interrupted run had fetched.
//!
//! Layout of the file store: `{dir}/{SYMBOL}_{interval}.csv`, append-only,
//! one header line then one row per candle. On load, rows are keyed by
//! `open_time` with later rows winning, which makes a re-fetched batch replace
//! its earlier copy. Rows that fail to parse (a torn final line after a
//! crash) are skipped.

use super::checkpoint::{file_stem, interval_tag, write_atomic};
use super::error::StoreError;
use crate::domain::{Candle, Interval, Series, FIELD_NAMES};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait SeriesStore: Send + Sync {
    /// Everything staged for `symbol`. Missing or unreadable staging is an
    /// empty series.
    fn load(&self, symbol: &str, interval: Interval) -> Series;

    /// Durably record `candles` (one batch) for `symbol`.
    fn append(&self, symbol: &str, interval: Interval, candles: &[Candle])
        -> Result<(), StoreError>;

    /// Atomically replace everything staged for `symbol` with `series`.
    fn rewrite(&self, symbol: &str, interval: Interval, series: &Series) -> Result<(), StoreError>;

    /// Drop everything staged for `symbol`.
    fn clear(&self, symbol: &str, interval: Interval) -> Result<(), StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    rows: Mutex<HashMap<(String, Interval), Vec<Candle>>>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeriesStore for MemorySeriesStore {
    fn load(&self, symbol: &str, interval: Interval) -> Series {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.get(&(symbol.to_string(), interval))
            .map(|v| Series::from_candles(v.iter().cloned()))
            .unwrap_or_default()
    }

    fn append(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((symbol.to_string(), interval))
            .or_default()
            .extend_from_slice(candles);
        Ok(())
    }

    fn rewrite(&self, symbol: &str, interval: Interval, series: &Series) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((symbol.to_string(), interval), series.as_slice().to_vec());
        Ok(())
    }

    fn clear(&self, symbol: &str, interval: Interval) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(symbol.to_string(), interval));
        Ok(())
    }
}

// ── File store ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileSeriesStore {
    dir: PathBuf,
}

impl FileSeriesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", file_stem(symbol), interval_tag(interval)))
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_num(s: &str) -> Option<f64> {
    s.parse().ok()
}

fn parse_record(record: &csv::StringRecord) -> Option<Candle> {
    if record.len() != FIELD_NAMES.len() {
        return None;
    }
    let opt_time = |i: usize| match &record[i] {
        "" => Some(None),
        s => parse_time(s).map(Some),
    };
    let opt_num = |i: usize| match &record[i] {
        "" => Some(None),
        s => parse_num(s).map(Some),
    };
    Some(Candle {
        open_time: parse_time(&record[0])?,
        open: opt_num(1)?,
        high: opt_num(2)?,
        low: opt_num(3)?,
        close: opt_num(4)?,
        volume: opt_num(5)?,
        close_time: opt_time(6)?,
        quote_volume: opt_num(7)?,
        trade_count: match &record[8] {
            "" => None,
            s => Some(s.parse().ok()?),
        },
        taker_buy_base_volume: opt_num(9)?,
        taker_buy_quote_volume: opt_num(10)?,
    })
}

/// Whether a non-empty file is missing its final newline (torn write).
fn needs_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn append_rows(path: &Path, candles: &[Candle]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    let fresh = file.metadata()?.len() == 0;
    if needs_newline(&mut file)? {
        file.write_all(b"\n")?;
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&mut file);
    if fresh {
        wtr.write_record(FIELD_NAMES)?;
    }
    for c in candles {
        wtr.write_record(c.field_strings())?;
    }
    wtr.flush()?;
    drop(wtr);
    file.sync_all()
}

fn encode_rows(candles: &[Candle]) -> Result<Vec<u8>, csv::Error> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(FIELD_NAMES)?;
    for c in candles {
        wtr.write_record(c.field_strings())?;
    }
    wtr.into_inner().map_err(|e| e.into_error().into())
}

impl SeriesStore for FileSeriesStore {
    fn load(&self, symbol: &str, interval: Interval) -> Series {
        let Ok(mut rdr) = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(self.path(symbol, interval))
        else {
            return Series::new();
        };
        let candles: Vec<Candle> = rdr
            .records()
            .filter_map(|r| r.ok())
            .filter_map(|r| parse_record(&r))
            .collect();
        Series::from_candles(candles)
    }

    fn append(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<(), StoreError> {
        let path = self.path(symbol, interval);
        append_rows(&path, candles).map_err(|source| StoreError::Io { path, source })
    }

    fn rewrite(&self, symbol: &str, interval: Interval, series: &Series) -> Result<(), StoreError> {
        let bytes = encode_rows(series.as_slice())
            .map_err(|e| StoreError::Encoding(format!("staged rows for {symbol}: {e}")))?;
        write_atomic(&self.path(symbol, interval), &bytes)
    }

    fn clear(&self, symbol: &str, interval: Interval) -> Result<(), StoreError> {
        let path = self.path(symbol, interval);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
