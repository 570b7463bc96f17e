//! Extraction run configuration, loaded from TOML.
//!
//! ```toml
//! symbols = ["BTCUSDT", "ETHUSDT"]
//! interval = "1d"
//! start = "2017-08-17"
//! end = "2024-01-01"
//! batch_size_days = 30
//! output = "data/majors_1d.parquet"
//! ```

use candlevault_core::data::DEFAULT_BASE_URL;
use candlevault_core::domain::{ExtractionJob, Interval};
use candlevault_core::extract::OrchestratorSettings;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_BATCH_DAYS: u32 = 3650;
const MAX_RETRIES: u32 = 20;
const MAX_DELAY_MS: u64 = 10 * 60 * 1000;

/// Smallest batch in whole days that always contains a bar open.
fn min_batch_days(interval: Interval) -> u32 {
    let secs = interval.duration().num_seconds().max(1);
    u32::try_from((secs + 86_399) / 86_400).unwrap_or(u32::MAX)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
}

impl OutputFormat {
    /// `.parquet` / `.pq` are Parquet; anything else is CSV.
    pub fn infer(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("parquet") | Some("pq") => OutputFormat::Parquet,
            _ => OutputFormat::Csv,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

fn default_batch_size_days() -> u32 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}
fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}
fn default_output() -> PathBuf {
    PathBuf::from("dataset.csv")
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// One extraction run: which symbols, which range, how to pace and where
/// to keep progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractConfig {
    pub symbols: Vec<String>,
    /// Binance interval string, e.g. `1m`, `4h`, `1d`.
    pub interval: String,
    /// Inclusive.
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    #[serde(default = "default_batch_size_days")]
    pub batch_size_days: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Defaults to the output file's extension.
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Command-line values that replace their config counterparts.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub symbols: Option<Vec<String>>,
    pub interval: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub output: Option<PathBuf>,
    pub parallel: bool,
}

impl ExtractConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(symbols) = overrides.symbols {
            self.symbols = symbols;
        }
        if let Some(interval) = overrides.interval {
            self.interval = interval;
        }
        if let Some(start) = overrides.start {
            self.start = start;
        }
        if let Some(end) = overrides.end {
            self.end = end;
        }
        if let Some(output) = overrides.output {
            self.output = output;
        }
        self.parallel |= overrides.parallel;
    }

    /// Symbols trimmed and upper-cased, in config order.
    pub fn normalized_symbols(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .collect()
    }

    pub fn parsed_interval(&self) -> Result<Interval, ConfigError> {
        self.interval
            .parse()
            .map_err(|e: candlevault_core::domain::UnknownInterval| {
                invalid("interval", e.to_string())
            })
    }

    pub fn output_format(&self) -> OutputFormat {
        self.format
            .unwrap_or_else(|| OutputFormat::infer(&self.output))
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            request_delay: Duration::from_millis(self.request_delay_ms),
            parallel: self.parallel,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let symbols = self.normalized_symbols();
        if symbols.is_empty() {
            return Err(invalid("symbols", "at least one symbol is required"));
        }
        let mut seen = HashSet::new();
        for symbol in &symbols {
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid(
                    "symbols",
                    format!("'{symbol}' is not a valid symbol (letters and digits only)"),
                ));
            }
            if !seen.insert(symbol.as_str()) {
                return Err(invalid("symbols", format!("'{symbol}' is listed twice")));
            }
        }

        let interval = self.parsed_interval()?;

        if self.start >= self.end {
            return Err(invalid(
                "start",
                format!("start {} must be before end {}", self.start, self.end),
            ));
        }
        if !(1..=MAX_BATCH_DAYS).contains(&self.batch_size_days) {
            return Err(invalid(
                "batch_size_days",
                format!("{} is outside 1..={MAX_BATCH_DAYS}", self.batch_size_days),
            ));
        }
        let min_batch = min_batch_days(interval);
        if self.batch_size_days < min_batch {
            return Err(invalid(
                "batch_size_days",
                format!(
                    "{} is shorter than one {interval} bar; use at least {min_batch}",
                    self.batch_size_days
                ),
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(invalid(
                "max_retries",
                format!("{} exceeds {MAX_RETRIES}", self.max_retries),
            ));
        }
        for (field, value) in [
            ("request_delay_ms", self.request_delay_ms),
            ("backoff_base_ms", self.backoff_base_ms),
        ] {
            if value > MAX_DELAY_MS {
                return Err(invalid(field, format!("{value}ms exceeds ten minutes")));
            }
        }
        Ok(())
    }

    /// Validate, then create one job per symbol.
    pub fn jobs(&self) -> Result<Vec<ExtractionJob>, ConfigError> {
        self.validate()?;
        let interval = self.parsed_interval()?;
        Ok(self
            .normalized_symbols()
            .into_iter()
            .map(|symbol| ExtractionJob {
                symbol,
                interval,
                start: self.start,
                end: self.end,
                batch_size_days: self.batch_size_days,
                max_retries: self.max_retries,
            })
            .collect())
    }
}
