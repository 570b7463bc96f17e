//! Extraction engine: ranges, retries, durable progress, validation, merge

pub mod checkpoint;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod observer;
pub mod orchestrator;
pub mod range;
pub mod staging;
pub mod validate;

pub use checkpoint::{
    write_atomic, Checkpoint, CheckpointStatus, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use error::{BatchError, ExtractError, RunError, StoreError};
pub use fetcher::{AttemptOutcome, BatchFetcher, RetryPolicy, Sleeper, ThreadSleeper};
pub use merge::{merge, MergeError, MergedDataset, MergedRow};
pub use observer::{ExtractionObserver, NullObserver, TracingObserver, LOG_TARGET};
pub use orchestrator::{
    CancelToken, Orchestrator, OrchestratorSettings, RunReport, SymbolOutcome, SymbolState,
};
pub use range::{midnight, partition, RangeError, Window};
pub use staging::{FileSeriesStore, MemorySeriesStore, SeriesStore};
pub use validate::{validate, TimeGapWarning, ValidationError, ValidationReport};
