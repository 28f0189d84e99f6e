//! Exchange-agnostic request plumbing used by the ingestion cycle.

use reqwest::Method;

use crate::services::bybit::ExchangeError;

/// A prepared, possibly signed, HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
            headers: Vec::new(),
        }
    }
}

/// Builds the latest-candle requests for a set of tracked symbols.
pub trait KlineRequestSource: Send + Sync {
    fn kline_requests(&self, symbols: &[String]) -> Result<Vec<RequestDescriptor>, ExchangeError>;
}
