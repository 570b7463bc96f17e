//! CandleVault CLI: extraction, planning, and checkpoint management commands.
//!
//! Commands:
//! - `extract`: fetch every configured symbol, merge, and write the dataset
//! - `plan`: print the batch windows a date range splits into
//! - `checkpoint status`: report each symbol's resume date
//! - `checkpoint reset`: forget progress so symbols re-extract from scratch

use anyhow::{Context, Result};
use candlevault_core::extract::{partition, RunError, TracingObserver};
use candlevault_runner::{
    binance_provider, checkpoint_status, reset_symbols, run_extraction, ConfigOverrides,
    ExtractConfig, PipelineOptions,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "candlevault",
    version,
    about = "CandleVault CLI: resumable historical candle extraction"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract candles for every configured symbol and write the merged dataset.
    Extract {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Replace the configured symbols (comma separated or repeated).
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        symbols: Option<Vec<String>>,

        /// Start date (YYYY-MM-DD, inclusive).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, exclusive).
        #[arg(long)]
        end: Option<String>,

        /// Kline interval, e.g. 1m, 4h, 1d.
        #[arg(long)]
        interval: Option<String>,

        /// Output path; `.parquet` selects Parquet.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Discard checkpoints and staged rows before starting.
        #[arg(long, default_value_t = false)]
        reset: bool,

        /// Extract symbols in parallel.
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Print the batch windows for a date range.
    Plan {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long, default_value_t = 30)]
        batch_size_days: i64,
    },
    /// Checkpoint management commands.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Report the resume date of every configured symbol.
    Status {
        #[arg(long)]
        config: PathBuf,
    },
    /// Delete checkpoints and staged rows. Without symbols, resets all configured symbols.
    Reset {
        #[arg(long)]
        config: PathBuf,

        symbols: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            config,
            symbols,
            start,
            end,
            interval,
            output,
            reset,
            parallel,
        } => {
            let overrides = ConfigOverrides {
                symbols,
                interval,
                start: start.as_deref().map(parse_date).transpose()?,
                end: end.as_deref().map(parse_date).transpose()?,
                output,
                parallel,
            };
            run_extract(&config, overrides, reset)
        }
        Commands::Plan {
            start,
            end,
            batch_size_days,
        } => run_plan(&start, &end, batch_size_days),
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Status { config } => run_checkpoint_status(&config),
            CheckpointAction::Reset { config, symbols } => run_checkpoint_reset(&config, symbols),
        },
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn load_config(path: &Path) -> Result<ExtractConfig> {
    ExtractConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn run_extract(config_path: &Path, overrides: ConfigOverrides, reset: bool) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.apply(overrides);
    config.validate()?;
    tracing::debug!(
        config = %config_path.display(),
        symbols = ?config.normalized_symbols(),
        interval = %config.interval,
        "config loaded"
    );

    let provider = binance_provider(&config)?;
    let options = PipelineOptions {
        reset,
        ..PipelineOptions::default()
    };

    match run_extraction(&config, &provider, &TracingObserver, &options) {
        Ok(outcome) => {
            println!(
                "Wrote {} rows for {} symbols to {}",
                outcome.manifest.rows,
                outcome.succeeded,
                config.output.display()
            );
            Ok(())
        }
        Err(err) => {
            if let Some(RunError::SymbolsFailed { failures, .. }) = err.downcast_ref::<RunError>() {
                for (symbol, reason) in failures {
                    eprintln!("Error for {symbol}: {reason}");
                }
                eprintln!("Progress is checkpointed; rerun the same command to resume.");
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_plan(start: &str, end: &str, batch_size_days: i64) -> Result<()> {
    let windows = partition(parse_date(start)?, parse_date(end)?, batch_size_days)?;
    for (i, window) in windows.iter().enumerate() {
        println!("{:>4}  {}  {} days", i + 1, window, window.days());
    }
    println!("{} batches", windows.len());
    Ok(())
}

fn run_checkpoint_status(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let statuses = checkpoint_status(&config)?;
    println!("{:<16} {:<4} RESUMES FROM", "SYMBOL", "BAR");
    for status in statuses {
        let date = status
            .last_processed_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("{} (no checkpoint)", config.start));
        println!("{:<16} {:<4} {}", status.symbol, status.interval, date);
    }
    Ok(())
}

fn run_checkpoint_reset(config_path: &Path, symbols: Vec<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let symbols = if symbols.is_empty() {
        config.normalized_symbols()
    } else {
        symbols
    };
    reset_symbols(&config, &symbols)?;
    println!("Reset {} symbols", symbols.len());
    Ok(())
}
