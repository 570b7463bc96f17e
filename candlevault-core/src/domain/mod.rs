//! Domain types shared by every stage of an extraction.

pub mod candle;
pub mod interval;
pub mod job;
pub mod series;

pub use candle::{Candle, FIELD_NAMES, REQUIRED_FIELDS};
pub use interval::{Interval, UnknownInterval};
pub use job::ExtractionJob;
pub use series::Series;
