//! Bounded-concurrency request fan-out
//!
//! All requests of a batch run as futures on the caller's task, at most
//! `max_concurrency` of them holding a permit at once. A failing request is
//! turned into a sentinel status for its own result sink and never aborts
//! its siblings.

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::HttpConfig;
use crate::services::market_data::RequestDescriptor;

/// No response was obtained (connection, timeout, body read).
pub const STATUS_TRANSPORT_FAILURE: i32 = -1;
/// The descriptor's method is neither GET nor POST.
pub const STATUS_UNSUPPORTED_METHOD: i32 = -2;

/// What a sink receives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub status: i32,
    /// Parsed JSON body; only present for 2xx responses with a valid body.
    pub result: Option<Value>,
}

impl RequestResult {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

/// An object that consumes request results through a dedicated method.
pub trait RequestResultHandler: Send + Sync {
    fn request_result_handler(&self, status: i32, result: Option<&Value>);
}

pub type ResultCallback = Arc<dyn Fn(i32, Option<&Value>) + Send + Sync>;

/// Where the outcome of one request is delivered.
#[derive(Clone)]
pub enum ResultSink {
    /// Plain function, called with `(status, result)`.
    Callback(ResultCallback),
    /// Object with a result-handling method.
    Handler(Arc<dyn RequestResultHandler>),
    /// Slot the structured result is written into.
    Slot(Arc<Mutex<Option<RequestResult>>>),
}

impl ResultSink {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(i32, Option<&Value>) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    pub fn handler(handler: Arc<dyn RequestResultHandler>) -> Self {
        Self::Handler(handler)
    }

    /// A sink backed by a fresh empty slot, returned alongside it.
    pub fn slot() -> (Self, Arc<Mutex<Option<RequestResult>>>) {
        let slot = Arc::new(Mutex::new(None));
        (Self::Slot(slot.clone()), slot)
    }

    fn deliver(&self, outcome: RequestResult) {
        match self {
            ResultSink::Callback(f) => f(outcome.status, outcome.result.as_ref()),
            ResultSink::Handler(handler) => {
                handler.request_result_handler(outcome.status, outcome.result.as_ref())
            }
            ResultSink::Slot(slot) => *slot.lock() = Some(outcome),
        }
    }
}

/// One request of a batch; without a sink its result is logged.
#[derive(Clone)]
pub struct PendingRequest {
    pub descriptor: RequestDescriptor,
    pub sink: Option<ResultSink>,
}

impl PendingRequest {
    pub fn new(descriptor: RequestDescriptor, sink: ResultSink) -> Self {
        Self {
            descriptor,
            sink: Some(sink),
        }
    }

    pub fn unobserved(descriptor: RequestDescriptor) -> Self {
        Self {
            descriptor,
            sink: None,
        }
    }
}

/// Raw response as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Sends one prepared request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, Box<dyn std::error::Error + Send + Sync>>;
}

/// `reqwest`-backed transport sharing one connection pool.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build the pooled client.
    ///
    /// `limit_per_host` caps idle connections kept per host, and
    /// `ttl_dns_cache` bounds how long an idle connection (with its resolved
    /// address) is reused before a fresh lookup.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(config.ttl_dns_cache)
            .connect_timeout(Duration::from_secs(10));
        if config.limit_per_host > 0 {
            builder = builder.pool_max_idle_per_host(config.limit_per_host);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, Box<dyn std::error::Error + Send + Sync>> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(TransportResponse { status, body })
    }
}

/// Totals for one executed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

pub struct FanoutExecutor {
    transport: Arc<dyn Transport>,
    max_concurrency: usize,
}

impl FanoutExecutor {
    pub fn new(transport: Arc<dyn Transport>, max_concurrency: usize) -> Self {
        Self {
            transport,
            max_concurrency: max_concurrency.clamp(1, Semaphore::MAX_PERMITS),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every request, at most `max_concurrency` in flight, and return
    /// once all of them have delivered a result.
    pub async fn run(&self, requests: Vec<PendingRequest>) -> BatchSummary {
        let started = Instant::now();
        let total = requests.len();
        let permits = Semaphore::new(self.max_concurrency);
        let permits = &permits;

        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let outcome = match permits.acquire().await {
                Ok(_permit) => self.execute(&request.descriptor).await,
                Err(_) => RequestResult {
                    status: STATUS_TRANSPORT_FAILURE,
                    result: None,
                },
            };
            let usable = outcome.is_success() && outcome.result.is_some();
            deliver(&request, outcome);
            usable
        }))
        .await;

        let failed = outcomes.iter().filter(|usable| !**usable).count();
        let elapsed = started.elapsed();
        debug!(
            requests = total,
            failed = failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "FanoutExecutor: batch of {} requests finished in {:?}",
            total,
            elapsed
        );

        BatchSummary {
            total,
            failed,
            elapsed,
        }
    }

    async fn execute(&self, request: &RequestDescriptor) -> RequestResult {
        if request.method != Method::GET && request.method != Method::POST {
            return RequestResult {
                status: STATUS_UNSUPPORTED_METHOD,
                result: None,
            };
        }

        match self.transport.send(request).await {
            Ok(response) => {
                let status = i32::from(response.status);
                let result = if (200..=299).contains(&status) && !response.body.is_empty() {
                    serde_json::from_slice(&response.body)
                        .map_err(|e| {
                            debug!(url = %request.url, error = %e, "FanoutExecutor: response body is not JSON");
                        })
                        .ok()
                } else {
                    None
                };
                RequestResult { status, result }
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "FanoutExecutor: request failed");
                RequestResult {
                    status: STATUS_TRANSPORT_FAILURE,
                    result: None,
                }
            }
        }
    }
}

fn deliver(request: &PendingRequest, outcome: RequestResult) {
    let Some(sink) = &request.sink else {
        info!(
            url = %request.descriptor.url,
            status = outcome.status,
            result = ?outcome.result,
            "FanoutExecutor: unobserved result"
        );
        return;
    };

    let status = outcome.status;
    if catch_unwind(AssertUnwindSafe(|| sink.deliver(outcome))).is_err() {
        error!(
            url = %request.descriptor.url,
            status = status,
            "FanoutExecutor: result sink panicked"
        );
    }
}
