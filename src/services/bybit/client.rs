//! Bybit v5 request builder with HMAC-SHA256 signing
//!
//! Builds request descriptors only; execution belongs to the fan-out
//! executor.

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use super::ExchangeError;
use crate::config::ExchangeConfig;
use crate::services::market_data::{KlineRequestSource, RequestDescriptor};

type HmacSha256 = Hmac<Sha256>;

pub const MAINNET_ENDPOINT: &str = "https://api.bybit.com";
pub const TESTNET_ENDPOINT: &str = "https://api-testnet.bybit.com";
pub const DEFAULT_RECV_WINDOW: u64 = 5000;

#[derive(Debug, Clone)]
pub struct BybitClient {
    endpoint: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    recv_window: u64,
    category: String,
}

impl BybitClient {
    pub fn new(testnet: bool) -> Self {
        let endpoint = if testnet { TESTNET_ENDPOINT } else { MAINNET_ENDPOINT };
        Self {
            endpoint: endpoint.to_string(),
            api_key: None,
            api_secret: None,
            recv_window: DEFAULT_RECV_WINDOW,
            category: "linear".to_string(),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        let mut client = Self::new(config.testnet).with_category(config.category.clone());
        if let (Some(key), Some(secret)) = (&config.api_key, &config.api_secret) {
            client = client.with_credentials(key.clone(), secret.clone());
        }
        client
    }

    /// Point the client at another host (a mock server, a proxy).
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ExchangeError> {
        let parsed = Url::parse(endpoint).map_err(|e| ExchangeError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        self.endpoint = parsed.as_str().trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_credentials(mut self, api_key: String, api_secret: String) -> Self {
        self.api_key = Some(api_key);
        self.api_secret = Some(api_secret);
        self
    }

    pub fn with_category(mut self, category: String) -> Self {
        self.category = category;
        self
    }

    pub fn with_recv_window(mut self, recv_window: u64) -> Self {
        self.recv_window = recv_window;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `GET /v5/market/kline` for the two most recent one-minute candles.
    pub fn get_kline(&self, symbol: &str) -> Result<RequestDescriptor, ExchangeError> {
        self.prepare_request(
            Method::GET,
            "/v5/market/kline",
            &[
                ("category", Some(self.category.clone())),
                ("symbol", Some(symbol.to_string())),
                ("interval", Some("1".to_string())),
                ("limit", Some("2".to_string())),
            ],
            false,
        )
    }

    /// `GET /v5/market/instruments-info` for the configured category.
    pub fn get_instruments_info(&self) -> Result<RequestDescriptor, ExchangeError> {
        self.prepare_request(
            Method::GET,
            "/v5/market/instruments-info",
            &[("category", Some(self.category.clone()))],
            false,
        )
    }

    /// HMAC-SHA256 hex signature of `timestamp + api_key + recv_window + payload`.
    pub fn sign(&self, payload: &str, timestamp_ms: i64) -> Result<String, ExchangeError> {
        let (Some(api_key), Some(api_secret)) = (&self.api_key, &self.api_secret) else {
            return Err(ExchangeError::MissingCredentials);
        };
        let message = format!("{timestamp_ms}{api_key}{}{payload}", self.recv_window);
        let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Assemble method, URL, body and headers for one API call.
    ///
    /// GET parameters become a key-sorted query string; other methods send
    /// them as a JSON object body. `None` parameters are dropped.
    pub fn prepare_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, Option<String>)],
        auth: bool,
    ) -> Result<RequestDescriptor, ExchangeError> {
        let params: BTreeMap<&str, &String> = params
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| (*key, v)))
            .collect();

        let payload = if method == Method::GET {
            params
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&")
        } else {
            serde_json::to_string(&params).map_err(|e| ExchangeError::Signing(e.to_string()))?
        };

        let mut headers = Vec::new();
        if auth {
            let timestamp = Utc::now().timestamp_millis();
            let signature = self.sign(&payload, timestamp)?;
            let api_key = self.api_key.clone().unwrap_or_default();
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
            headers.push(("X-BAPI-API-KEY".to_string(), api_key));
            headers.push(("X-BAPI-SIGN".to_string(), signature));
            headers.push(("X-BAPI-SIGN-TYPE".to_string(), "2".to_string()));
            headers.push(("X-BAPI-TIMESTAMP".to_string(), timestamp.to_string()));
            headers.push(("X-BAPI-RECV-WINDOW".to_string(), self.recv_window.to_string()));
        }

        let base = format!("{}{}", self.endpoint, path);
        let (url, body) = if method == Method::GET {
            let url = if payload.is_empty() {
                base
            } else {
                format!("{base}?{payload}")
            };
            (url, None)
        } else {
            (base, Some(payload))
        };

        debug!(method = %method, url = %url, signed = auth, "BybitClient: prepared request");

        Ok(RequestDescriptor {
            method,
            url,
            body,
            headers,
        })
    }
}

impl KlineRequestSource for BybitClient {
    fn kline_requests(&self, symbols: &[String]) -> Result<Vec<RequestDescriptor>, ExchangeError> {
        symbols.iter().map(|symbol| self.get_kline(symbol)).collect()
    }
}
