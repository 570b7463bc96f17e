//! Provider seam, Binance client and row normalization

pub mod binance;
pub mod circuit_breaker;
pub mod normalize;
pub mod provider;

pub use binance::{BinanceProvider, DEFAULT_BASE_URL};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use normalize::{normalize_row, normalize_rows, Normalized};
pub use provider::{CandleProvider, ProviderError, RawRow};
