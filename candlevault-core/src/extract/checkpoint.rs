//! Checkpoint store: durable per-symbol extraction progress.
//!
//! A checkpoint records the exclusive upper bound already fetched for one
//! symbol at one interval. Stores never share a record between keys, so
//! parallel per-symbol extractions do not interfere, and a `1h` run never
//! resumes from a `1d` run's progress.
//!
//! Layout of the file store: `{dir}/{SYMBOL}_{interval}.json`, body
//! `{"symbol": "BTCUSDT", "interval": "1d", "lastProcessedDate": "2017-02-01"}`.

use super::error::StoreError;
use crate::domain::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub symbol: String,
    pub interval: Interval,
    #[serde(rename = "lastProcessedDate")]
    pub last_processed_date: NaiveDate,
}

/// Checkpoint presence for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointStatus {
    pub symbol: String,
    pub interval: Interval,
    pub last_processed_date: Option<NaiveDate>,
}

pub trait CheckpointStore: Send + Sync {
    /// Stored checkpoint, or `None` when absent. Unreadable or corrupt
    /// storage is also `None`: extraction can always restart from scratch.
    fn load(&self, symbol: &str, interval: Interval) -> Option<Checkpoint>;

    /// Overwrite the checkpoint. A date earlier than the stored one is
    /// ignored so progress never regresses.
    fn save(&self, symbol: &str, interval: Interval, date: NaiveDate) -> Result<(), StoreError>;

    /// Delete the checkpoint. Deleting a missing one is not an error.
    fn reset(&self, symbol: &str, interval: Interval) -> Result<(), StoreError>;

    /// The resume date, ignoring a record whose symbol or interval does not
    /// match the key it was stored under.
    fn resume_date(&self, symbol: &str, interval: Interval) -> Option<NaiveDate> {
        self.load(symbol, interval)
            .filter(|cp| cp.symbol == symbol && cp.interval == interval)
            .map(|cp| cp.last_processed_date)
    }

    fn status(&self, symbols: &[&str], interval: Interval) -> Vec<CheckpointStatus> {
        symbols
            .iter()
            .map(|s| CheckpointStatus {
                symbol: s.to_string(),
                interval,
                last_processed_date: self.resume_date(s, interval),
            })
            .collect()
    }
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: Mutex<HashMap<(String, Interval), Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record under `(symbol, interval)`, bypassing the monotonic guard.
    pub fn insert(&self, symbol: &str, interval: Interval, checkpoint: Checkpoint) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((symbol.to_string(), interval), checkpoint);
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, symbol: &str, interval: Interval) -> Option<Checkpoint> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(symbol.to_string(), interval))
            .cloned()
    }

    fn save(&self, symbol: &str, interval: Interval, date: NaiveDate) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let entry = records
            .entry((symbol.to_string(), interval))
            .or_insert(Checkpoint {
                symbol: symbol.to_string(),
                interval,
                last_processed_date: date,
            });
        entry.last_processed_date = entry.last_processed_date.max(date);
        Ok(())
    }

    fn reset(&self, symbol: &str, interval: Interval) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(symbol.to_string(), interval));
        Ok(())
    }
}

// ── File store ──────────────────────────────────────────────────────

/// One JSON file per symbol and interval, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", file_stem(symbol), interval_tag(interval)))
    }
}

/// Symbol as a safe file stem: anything outside `[A-Za-z0-9_-]` becomes `_`.
pub(crate) fn file_stem(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Interval as a file-name tag. `1m` and `1M` must not collide on
/// case-insensitive filesystems.
pub(crate) fn interval_tag(interval: Interval) -> &'static str {
    match interval {
        Interval::Month1 => "1mo",
        other => other.as_str(),
    }
}

/// Write `bytes` to `path` via a synced temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(e)
    })
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, symbol: &str, interval: Interval) -> Option<Checkpoint> {
        let content = fs::read_to_string(self.path(symbol, interval)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn save(&self, symbol: &str, interval: Interval, date: NaiveDate) -> Result<(), StoreError> {
        if let Some(stored) = self.resume_date(symbol, interval) {
            if stored >= date {
                return Ok(());
            }
        }
        let record = Checkpoint {
            symbol: symbol.to_string(),
            interval,
            last_processed_date: date,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Encoding(format!("checkpoint for {symbol}: {e}")))?;
        write_atomic(&self.path(symbol, interval), &json)
    }

    fn reset(&self, symbol: &str, interval: Interval) -> Result<(), StoreError> {
        let path = self.path(symbol, interval);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
