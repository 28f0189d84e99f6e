//! Job handlers for the ingestion and eviction cycles

use crate::core::fanout::{PendingRequest, RequestResultHandler, ResultSink};
use crate::jobs::context::JobContext;
use crate::jobs::ingest::KlineIngestor;
use crate::models::{truncate_to_minute, Alert, CandleRecord};
use crate::signals::AlertEngine;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one ingestion cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Bucket opened for the cycle.
    pub bucket: DateTime<Utc>,
    pub requested: usize,
    pub failed: usize,
    pub written: usize,
    pub alerts: Vec<Alert>,
    pub saved: usize,
}

/// Handler for one ingestion tick
///
/// Opens the bucket of the last closed minute, fetches every tracked
/// symbol's latest closed candle, then (once all fetches are done) computes
/// indicators, evaluates alerts and persists each bucket that received data.
pub async fn handle_ingest_cycle(ctx: &JobContext, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
    let bucket = ctx
        .store
        .write()
        .open_bucket(truncate_to_minute(now) - Duration::minutes(1));

    let symbols = ctx
        .tracked_symbols()
        .await
        .context("failed to resolve tracked symbols")?;
    let descriptors = ctx
        .exchange
        .kline_requests(&symbols)
        .context("failed to build kline requests")?;

    debug!(
        bucket = %bucket,
        symbols = symbols.len(),
        "IngestCycle: fetching {} symbols for bucket {}",
        symbols.len(),
        bucket
    );

    let ingestor = Arc::new(KlineIngestor::new(ctx.store.clone()));
    let handler: Arc<dyn RequestResultHandler> = ingestor.clone();
    let requests = descriptors
        .into_iter()
        .map(|descriptor| PendingRequest::new(descriptor, ResultSink::handler(handler.clone())))
        .collect();
    let summary = ctx.executor.run(requests).await;

    let engine = AlertEngine::new(ctx.settings.thresholds);
    let mut alerts = Vec::new();
    let mut records: Vec<CandleRecord> = Vec::new();
    {
        let mut store = ctx.store.write();
        for touched in ingestor.touched_buckets() {
            store.compute_indicators(touched, ctx.settings.window_minutes);
            store.compute_btc_impact(
                touched,
                &ctx.settings.reference_symbol,
                ctx.settings.window_minutes,
            );
            if let Some(target) = store.bucket_mut(touched) {
                alerts.extend(engine.evaluate(target, ctx.alert_sink.as_ref()));
            }
            records.extend(store.records(touched));
        }
    }

    ctx.repository
        .save(&records)
        .await
        .context("failed to persist klines")?;

    if let Some(ref metrics) = ctx.metrics {
        metrics.cycles_total.inc();
        metrics.fetch_failures_total.inc_by(summary.failed as u64);
        metrics.alerts_total.inc_by(alerts.len() as u64);
        metrics.buckets.set(ctx.store.read().len() as i64);
        metrics
            .batch_duration_seconds
            .observe(summary.elapsed.as_secs_f64());
    }

    info!(
        bucket = %bucket,
        requested = summary.total,
        failed = summary.failed,
        written = ingestor.written(),
        alerts = alerts.len(),
        "IngestCycle: {} of {} klines stored, {} alerts",
        ingestor.written(),
        summary.total,
        alerts.len()
    );

    Ok(CycleReport {
        bucket,
        requested: summary.total,
        failed: summary.failed,
        written: ingestor.written(),
        alerts,
        saved: records.len(),
    })
}

/// Handler for the eviction tick. Returns the number of buckets dropped.
pub fn handle_evict(ctx: &JobContext, now: DateTime<Utc>) -> usize {
    let (evicted, remaining) = {
        let mut store = ctx.store.write();
        let evicted = store.evict(now, ctx.settings.window_minutes, ctx.settings.grace_minutes);
        (evicted, store.len())
    };

    if let Some(ref metrics) = ctx.metrics {
        metrics.evicted_buckets_total.inc_by(evicted as u64);
        metrics.buckets.set(remaining as i64);
    }

    if evicted > 0 {
        info!(
            evicted = evicted,
            remaining = remaining,
            "EvictCycle: dropped {} stale buckets",
            evicted
        );
    }
    evicted
}

/// Startup warm-up: reload persisted records still inside the window.
///
/// Returns the number of records loaded.
pub async fn warm_up(ctx: &JobContext, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let lookback = ctx
        .settings
        .window_minutes
        .checked_add(1)
        .and_then(Duration::try_minutes)
        .and_then(|span| now.checked_sub_signed(span))
        .with_context(|| format!("invalid tracking window of {} minutes", ctx.settings.window_minutes))?;
    let cutoff = truncate_to_minute(lookback);
    let records = ctx
        .repository
        .load_since(cutoff)
        .await
        .context("failed to load kline history")?;

    let (loaded, buckets) = {
        let mut store = ctx.store.write();
        let loaded = store.reload(records);
        (loaded, store.len())
    };

    if let Some(ref metrics) = ctx.metrics {
        metrics.buckets.set(buckets as i64);
    }

    info!(
        cutoff = %cutoff,
        records = loaded,
        buckets = buckets,
        "WarmUp: reloaded {} klines into {} buckets",
        loaded,
        buckets
    );
    Ok(loaded)
}
