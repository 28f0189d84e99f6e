//! Unit tests for the fan-out executor

use async_trait::async_trait;
use klinewatch::core::fanout::{
    FanoutExecutor, PendingRequest, RequestResult, RequestResultHandler, ResultSink, Transport,
    TransportResponse, STATUS_TRANSPORT_FAILURE, STATUS_UNSUPPORTED_METHOD,
};
use klinewatch::services::RequestDescriptor;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Transport that answers from the URL and records peak concurrency.
#[derive(Default)]
struct MockTransport {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.url.contains("/down") {
            return Err("connection refused".into());
        }
        if request.url.contains("/missing") {
            return Ok(TransportResponse {
                status: 404,
                body: b"{\"error\":\"not found\"}".to_vec(),
            });
        }
        if request.url.contains("/garbage") {
            return Ok(TransportResponse {
                status: 200,
                body: b"<html>".to_vec(),
            });
        }
        Ok(TransportResponse {
            status: 200,
            body: serde_json::to_vec(&json!({ "url": request.url })).unwrap(),
        })
    }
}

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(i32, Option<Value>)>>,
}

impl RequestResultHandler for RecordingHandler {
    fn request_result_handler(&self, status: i32, result: Option<&Value>) {
        self.seen.lock().push((status, result.cloned()));
    }
}

fn executor(transport: Arc<MockTransport>, k: usize) -> FanoutExecutor {
    FanoutExecutor::new(transport, k)
}

#[tokio::test]
async fn test_never_exceeds_concurrency_and_delivers_once_each() {
    for k in [1, 3, 8] {
        let transport = Arc::new(MockTransport::default());
        let delivered = Arc::new(AtomicUsize::new(0));

        let requests = (0..25)
            .map(|i| {
                let delivered = delivered.clone();
                PendingRequest::new(
                    RequestDescriptor::get(format!("http://mock/ok/{i}")),
                    ResultSink::callback(move |status, result| {
                        assert_eq!(status, 200);
                        assert!(result.is_some());
                        delivered.fetch_add(1, Ordering::SeqCst);
                    }),
                )
            })
            .collect();

        let summary = executor(transport.clone(), k).run(requests).await;
        assert_eq!(summary.total, 25);
        assert_eq!(summary.failed, 0);
        assert_eq!(delivered.load(Ordering::SeqCst), 25);
        assert!(transport.peak.load(Ordering::SeqCst) <= k);
        assert!(transport.peak.load(Ordering::SeqCst) >= 1);
    }
}

#[tokio::test]
async fn test_zero_concurrency_is_clamped_to_one() {
    let transport = Arc::new(MockTransport::default());
    let fanout = executor(transport, 0);
    assert_eq!(fanout.max_concurrency(), 1);
}

#[tokio::test]
async fn test_unbounded_concurrency_is_clamped_to_permit_ceiling() {
    let transport = Arc::new(MockTransport::default());
    let fanout = executor(transport.clone(), usize::MAX);
    assert_eq!(fanout.max_concurrency(), Semaphore::MAX_PERMITS);

    let summary = fanout
        .run(vec![PendingRequest::unobserved(RequestDescriptor::get("http://mock/ok/1"))])
        .await;
    assert_eq!(summary.total, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_are_isolated_per_request() {
    let transport = Arc::new(MockTransport::default());
    let handler = Arc::new(RecordingHandler::default());
    let sink = ResultSink::handler(handler.clone());

    let urls = [
        "http://mock/ok/1",
        "http://mock/down",
        "http://mock/missing",
        "http://mock/garbage",
        "http://mock/ok/2",
    ];
    let requests = urls
        .iter()
        .map(|url| PendingRequest::new(RequestDescriptor::get(*url), sink.clone()))
        .collect();

    let summary = executor(transport, 2).run(requests).await;
    assert_eq!(summary.total, 5);
    assert_eq!(summary.failed, 3);

    let seen = handler.seen.lock();
    assert_eq!(seen.len(), 5);
    assert!(seen.contains(&(STATUS_TRANSPORT_FAILURE, None)));
    assert!(seen.contains(&(404, None)));
    assert!(seen.contains(&(200, None)));
    assert_eq!(seen.iter().filter(|(_, r)| r.is_some()).count(), 2);
}

#[tokio::test]
async fn test_unsupported_method_never_reaches_transport() {
    let transport = Arc::new(MockTransport::default());
    let (sink, slot) = ResultSink::slot();
    let descriptor = RequestDescriptor {
        method: Method::DELETE,
        ..RequestDescriptor::get("http://mock/ok/1")
    };

    executor(transport.clone(), 4)
        .run(vec![PendingRequest::new(descriptor, sink)])
        .await;

    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        *slot.lock(),
        Some(RequestResult {
            status: STATUS_UNSUPPORTED_METHOD,
            result: None,
        })
    );
}

#[tokio::test]
async fn test_post_is_supported() {
    let transport = Arc::new(MockTransport::default());
    let (sink, slot) = ResultSink::slot();
    let descriptor = RequestDescriptor {
        method: Method::POST,
        body: Some("{}".to_string()),
        ..RequestDescriptor::get("http://mock/ok/post")
    };

    executor(transport, 1)
        .run(vec![PendingRequest::new(descriptor, sink)])
        .await;

    let outcome = slot.lock().clone().unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.result, Some(json!({ "url": "http://mock/ok/post" })));
}

#[tokio::test]
async fn test_slot_receives_structured_result() {
    let transport = Arc::new(MockTransport::default());
    let (sink, slot) = ResultSink::slot();

    executor(transport, 1)
        .run(vec![PendingRequest::new(
            RequestDescriptor::get("http://mock/ok/slot"),
            sink,
        )])
        .await;

    let outcome = slot.lock().clone().unwrap();
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.result, Some(json!({ "url": "http://mock/ok/slot" })));
}

#[tokio::test]
async fn test_panicking_sink_does_not_abort_batch() {
    let transport = Arc::new(MockTransport::default());
    let (sink, slot) = ResultSink::slot();

    let requests = vec![
        PendingRequest::new(
            RequestDescriptor::get("http://mock/ok/boom"),
            ResultSink::callback(|_, _| panic!("handler failure")),
        ),
        PendingRequest::new(RequestDescriptor::get("http://mock/ok/after"), sink),
        PendingRequest::unobserved(RequestDescriptor::get("http://mock/ok/logged")),
    ];

    let summary = executor(transport, 1).run(requests).await;
    assert_eq!(summary.total, 3);
    assert!(slot.lock().is_some());
}

#[tokio::test]
async fn test_empty_batch_returns_immediately() {
    let transport = Arc::new(MockTransport::default());
    let summary = executor(transport, 4).run(Vec::new()).await;
    assert_eq!(summary.total, 0);
    assert_eq!(summary.failed, 0);
}
