//! Extraction job: one symbol's unit of work.

use super::interval::Interval;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything needed to extract one symbol over `[start, end)`.
///
/// Jobs are created once per run and only ever handed out by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub symbol: String,
    pub interval: Interval,
    /// Inclusive.
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub batch_size_days: u32,
    pub max_retries: u32,
}

impl ExtractionJob {
    /// Resume point: the stored checkpoint if it is later than the job's
    /// start, otherwise the start itself.
    pub fn effective_start(&self, checkpoint: Option<NaiveDate>) -> NaiveDate {
        checkpoint.map_or(self.start, |c| c.max(self.start))
    }
}
