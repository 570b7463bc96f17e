//! CandleVault Runner: configured extraction runs and dataset export.
//!
//! This crate builds on `candlevault-core` to provide:
//! - TOML run configuration with validation and CLI overrides
//! - File-backed checkpoint and staging stores wired from config
//! - The extract → merge → export pipeline
//! - CSV and Parquet dataset writers with a BLAKE3 manifest

pub mod config;
pub mod export;
pub mod pipeline;

pub use config::{ConfigError, ConfigOverrides, ExtractConfig, OutputFormat};
pub use export::{write_dataset, Manifest};
pub use pipeline::{
    binance_provider, checkpoint_status, extract, reset_symbols, run_extraction, PipelineOptions,
    PipelineOutcome,
};
