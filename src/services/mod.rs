//! External exchange collaborators.

pub mod bybit;
pub mod market_data;

pub use market_data::{KlineRequestSource, RequestDescriptor};
