//! Bybit v5 REST collaborator: request building and response parsing.

pub mod client;
pub mod parse;

pub use client::BybitClient;
pub use parse::{parse_instruments, parse_kline_response, KlineSnapshot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("authenticated endpoints require BYBIT_API_KEY and BYBIT_API_SECRET")]
    MissingCredentials,
    #[error("failed to sign request: {0}")]
    Signing(String),
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("exchange rejected request (retCode {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("malformed exchange response: {0}")]
    MalformedResponse(String),
}
