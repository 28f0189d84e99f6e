//! Prometheus metrics for the monitor

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub cycles_total: IntCounter,
    pub fetch_failures_total: IntCounter,
    pub alerts_total: IntCounter,
    pub evicted_buckets_total: IntCounter,
    pub buckets: IntGauge,
    pub batch_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total =
            IntCounter::new("klinewatch_cycles_total", "Completed ingestion cycles")?;
        let fetch_failures_total = IntCounter::new(
            "klinewatch_fetch_failures_total",
            "Kline requests that failed or returned no usable body",
        )?;
        let alerts_total = IntCounter::new("klinewatch_alerts_total", "Alerts raised")?;
        let evicted_buckets_total = IntCounter::new(
            "klinewatch_evicted_buckets_total",
            "Buckets dropped by eviction",
        )?;
        let buckets = IntGauge::new("klinewatch_buckets", "Buckets currently held in memory")?;
        let batch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "klinewatch_batch_duration_seconds",
                "Wall-clock duration of one fan-out batch",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(fetch_failures_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(evicted_buckets_total.clone()))?;
        registry.register(Box::new(buckets.clone()))?;
        registry.register(Box::new(batch_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            fetch_failures_total,
            alerts_total,
            evicted_buckets_total,
            buckets,
            batch_duration_seconds,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
