//! Error types for the extraction engine.
//!
//! Every permanent failure carries enough context (symbol, window, cause) to
//! be logged and to explain why the next run will resume where it does.

use super::merge::MergeError;
use super::range::{RangeError, Window};
use super::validate::ValidationError;
use crate::data::ProviderError;
use std::path::PathBuf;
use thiserror::Error;

/// Durable-store failures (checkpoints and staged rows).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store encoding: {0}")]
    Encoding(String),
}

/// A batch that could not be fetched. Transient provider errors never
/// surface here on their own; they appear only wrapped in `RetriesExhausted`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BatchError {
    #[error("{symbol} {window}: provider returned no rows for a non-empty window")]
    EmptyWindow { symbol: String, window: Window },

    #[error("{symbol} {window}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        symbol: String,
        window: Window,
        attempts: u32,
        last: ProviderError,
    },

    #[error("{symbol} {window}: {cause}")]
    Permanent {
        symbol: String,
        window: Window,
        cause: ProviderError,
    },
}

impl BatchError {
    pub fn window(&self) -> Window {
        match self {
            BatchError::EmptyWindow { window, .. }
            | BatchError::RetriesExhausted { window, .. }
            | BatchError::Permanent { window, .. } => *window,
        }
    }
}

/// Why one symbol's extraction ended in `FAILED`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("{symbol}: validation failed: {source}")]
    Validation {
        symbol: String,
        #[source]
        source: ValidationError,
    },

    #[error("{symbol}: {source}")]
    Store {
        symbol: String,
        #[source]
        source: StoreError,
    },

    #[error("{symbol}: cancelled before {next}")]
    Cancelled { symbol: String, next: Window },
}

/// Run-level failure: the merge step was never reached or could not finish.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{} of {total} symbols failed: {}", .failures.len(), summarize(.failures))]
    SymbolsFailed {
        total: usize,
        failures: Vec<(String, String)>,
    },

    #[error(transparent)]
    Merge(#[from] MergeError),
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(symbol, reason)| format!("{symbol} ({reason})"))
        .collect::<Vec<_>>()
        .join("; ")
}
