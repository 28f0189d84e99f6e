//! Shared data models spanning the store, alerting and persistence layers.

pub mod alert;
pub mod candle;
pub mod symbol;

pub use alert::{Alert, AlertDirection};
pub use candle::{quantize, truncate_to_minute, CandleRecord, Extremes, Ohlcv, PRICE_SCALE};
pub use symbol::SymbolInfo;
