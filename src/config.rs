//! Environment configuration
//!
//! Every variable is optional. Values that fail to parse fall back to their
//! default with a warning; only cron expressions are validated strictly, at
//! scheduler registration.

use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

pub const DEFAULT_DATABASE_URL: &str = "host=localhost user=postgres dbname=klinewatch";

/// Upper bound for the tracking window and the eviction grace (one week).
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Outbound HTTP limits for the fan-out executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub parallel_requests: usize,
    /// Global connection cap; 0 means unlimited.
    pub limit: usize,
    /// Idle connections kept per host; 0 means unlimited.
    pub limit_per_host: usize,
    pub ttl_dns_cache: Duration,
}

impl HttpConfig {
    /// Permit count for the executor: `parallel_requests`, clamped by `limit`
    /// and by the semaphore's permit ceiling.
    pub fn effective_concurrency(&self) -> usize {
        let concurrency = if self.limit == 0 {
            self.parallel_requests
        } else {
            self.parallel_requests.min(self.limit)
        };
        concurrency.clamp(1, Semaphore::MAX_PERMITS)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            parallel_requests: 100,
            limit: 100,
            limit_per_host: 0,
            ttl_dns_cache: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub testnet: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub category: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            api_key: None,
            api_secret: None,
            category: "linear".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub environment: String,
    pub debug: bool,
    pub database_url: String,
    pub tracking_period_minutes: i64,
    pub eviction_grace_minutes: i64,
    pub alarm_threshold: Decimal,
    pub impact_threshold: Decimal,
    pub reference_symbol: String,
    pub symbols: Vec<String>,
    pub base_symbols: Vec<String>,
    pub added_delay: Duration,
    pub ingest_schedule: String,
    pub ingest_delay: Duration,
    pub evict_schedule: String,
    pub catch_job_errors: bool,
    pub http_port: u16,
    pub http: HttpConfig,
    pub exchange: ExchangeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "sandbox".to_string(),
            debug: false,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            tracking_period_minutes: 60,
            eviction_grace_minutes: 5,
            alarm_threshold: Decimal::new(1, 1),
            impact_threshold: Decimal::new(8, 1),
            reference_symbol: "BTCUSDT".to_string(),
            symbols: Vec::new(),
            base_symbols: vec!["BTCUSDT".to_string()],
            added_delay: Duration::ZERO,
            ingest_schedule: "0 * * * * *".to_string(),
            ingest_delay: Duration::from_secs(1),
            evict_schedule: "30 * * * * *".to_string(),
            catch_job_errors: false,
            http_port: 0,
            http: HttpConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read configuration through `lookup`, so callers can supply any source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            environment: get("APP_ENV").unwrap_or(defaults.environment),
            debug: get("DEBUG").map(|v| parse_flag(&v)).unwrap_or(defaults.debug),
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            tracking_period_minutes: parse_minutes(
                "TRACKING_PERIOD",
                get("TRACKING_PERIOD"),
                defaults.tracking_period_minutes,
                1,
            ),
            eviction_grace_minutes: parse_minutes(
                "EVICTION_GRACE",
                get("EVICTION_GRACE"),
                defaults.eviction_grace_minutes,
                0,
            ),
            alarm_threshold: parse_or(
                "ALARM_THRESHOLD",
                get("ALARM_THRESHOLD"),
                defaults.alarm_threshold,
            ),
            impact_threshold: parse_or(
                "BTC_IMPACT_THRESHOLD",
                get("BTC_IMPACT_THRESHOLD"),
                defaults.impact_threshold,
            ),
            reference_symbol: get("REFERENCE_SYMBOL").unwrap_or(defaults.reference_symbol),
            symbols: get("SYMBOLS").map(|v| parse_list(&v)).unwrap_or(defaults.symbols),
            base_symbols: get("BASE_SYMBOLS")
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.base_symbols),
            added_delay: parse_seconds("ADDED_DELAY", get("ADDED_DELAY"), defaults.added_delay),
            ingest_schedule: get("INGEST_SCHEDULE").unwrap_or(defaults.ingest_schedule),
            ingest_delay: parse_seconds("INGEST_DELAY", get("INGEST_DELAY"), defaults.ingest_delay),
            evict_schedule: get("EVICT_SCHEDULE").unwrap_or(defaults.evict_schedule),
            catch_job_errors: get("CATCH_JOB_ERRORS")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.catch_job_errors),
            http_port: parse_or("HTTP_PORT", get("HTTP_PORT"), defaults.http_port),
            http: HttpConfig {
                parallel_requests: parse_or(
                    "PARALLEL_REQUESTS",
                    get("PARALLEL_REQUESTS"),
                    defaults.http.parallel_requests,
                ),
                limit: parse_or("LIMIT", get("LIMIT"), defaults.http.limit),
                limit_per_host: parse_or(
                    "LIMIT_PER_HOST",
                    get("LIMIT_PER_HOST"),
                    defaults.http.limit_per_host,
                ),
                ttl_dns_cache: Duration::from_secs(parse_or(
                    "TTL_DNS_CACHE",
                    get("TTL_DNS_CACHE"),
                    defaults.http.ttl_dns_cache.as_secs(),
                )),
            },
            exchange: ExchangeConfig {
                testnet: get("BYBIT_TESTNET")
                    .map(|v| parse_flag(&v))
                    .unwrap_or(defaults.exchange.testnet),
                api_key: get("BYBIT_API_KEY"),
                api_secret: get("BYBIT_API_SECRET"),
                category: get("BYBIT_CATEGORY").unwrap_or(defaults.exchange.category),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!(key = key, value = %raw, error = %e, "Config: invalid {}, using default", key);
            default
        }),
    }
}

fn parse_minutes(key: &str, raw: Option<String>, default: i64, min: i64) -> i64 {
    let minutes = parse_or(key, raw, default);
    if (min..=MAX_WINDOW_MINUTES).contains(&minutes) {
        return minutes;
    }
    warn!(
        key = key,
        value = minutes,
        min = min,
        max = MAX_WINDOW_MINUTES,
        "Config: {} out of range, using default",
        key
    );
    default
}

fn parse_seconds(key: &str, raw: Option<String>, default: Duration) -> Duration {
    let seconds: f64 = parse_or(key, raw, default.as_secs_f64());
    Duration::try_from_secs_f64(seconds).unwrap_or_else(|e| {
        warn!(key = key, error = %e, "Config: invalid {}, using default", key);
        default
    })
}
