//! Writes kline responses into the candle store as they arrive.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::core::fanout::RequestResultHandler;
use crate::services::bybit::parse_kline_response;
use crate::store::SharedCandleStore;

pub struct KlineIngestor {
    store: SharedCandleStore,
    touched: Mutex<BTreeSet<DateTime<Utc>>>,
    written: AtomicUsize,
    skipped: AtomicUsize,
}

impl KlineIngestor {
    pub fn new(store: SharedCandleStore) -> Self {
        Self {
            store,
            touched: Mutex::new(BTreeSet::new()),
            written: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    /// Buckets that received at least one candle, ascending.
    pub fn touched_buckets(&self) -> Vec<DateTime<Utc>> {
        self.touched.lock().iter().copied().collect()
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    /// Responses dropped for a failure status or an unusable body.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }
}

impl RequestResultHandler for KlineIngestor {
    fn request_result_handler(&self, status: i32, result: Option<&Value>) {
        let Some(value) = result.filter(|_| (200..=299).contains(&status)) else {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            debug_skip(status, "no usable response");
            return;
        };

        match parse_kline_response(value) {
            Ok(snapshot) => {
                self.store
                    .write()
                    .upsert(snapshot.bucket, &snapshot.symbol, snapshot.ohlcv);
                self.touched.lock().insert(snapshot.bucket);
                self.written.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                debug_skip(status, &e.to_string());
            }
        }
    }
}

fn debug_skip(status: i32, reason: &str) {
    debug!(
        status = status,
        reason = reason,
        "KlineIngestor: skipping response ({})",
        reason
    );
}
