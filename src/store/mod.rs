//! Minute-bucketed candle store with rolling-window indicators
//!
//! Buckets are keyed by minute-truncated UTC timestamps and kept in
//! chronological order. Each window computation scans every bucket between
//! `bucket - window` and `bucket` inclusive, skipping buckets where the
//! symbol has no record. Stale buckets are only ever dropped whole, by
//! [`CandleStore::evict`].

pub mod bucket;
pub mod indicators;

pub use bucket::TimeBucket;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::models::{truncate_to_minute, CandleRecord, Extremes, Ohlcv};
use indicators::{impact_rate, scan_extremes};

/// Store handle shared between the ingestion, eviction and HTTP tasks.
///
/// The lock is only held for the synchronous passes below, never across an
/// `.await`, so two passes never interleave on the same bucket.
pub type SharedCandleStore = Arc<RwLock<CandleStore>>;

#[derive(Debug, Default)]
pub struct CandleStore {
    buckets: BTreeMap<DateTime<Utc>, TimeBucket>,
    current: Option<DateTime<Utc>>,
}

/// Start of the inclusive window ending at `end`; `None` for a negative or
/// unrepresentable span.
fn window_start(end: DateTime<Utc>, window_minutes: i64) -> Option<DateTime<Utc>> {
    if window_minutes < 0 {
        return None;
    }
    end.checked_sub_signed(Duration::try_minutes(window_minutes)?)
}

impl CandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCandleStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Create (or reuse) the bucket for `timestamp`'s minute and mark it current.
    pub fn open_bucket(&mut self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let key = truncate_to_minute(timestamp);
        self.buckets
            .entry(key)
            .or_insert_with(|| TimeBucket::new(key));
        self.current = Some(key);
        key
    }

    /// Write `symbol`'s candle into the bucket for `bucket`'s minute.
    ///
    /// A missing bucket is created without moving the current pointer.
    pub fn upsert(&mut self, bucket: DateTime<Utc>, symbol: &str, ohlcv: Ohlcv) -> &CandleRecord {
        let key = truncate_to_minute(bucket);
        self.buckets
            .entry(key)
            .or_insert_with(|| TimeBucket::new(key))
            .upsert(symbol, ohlcv)
    }

    pub fn bucket(&self, timestamp: DateTime<Utc>) -> Option<&TimeBucket> {
        self.buckets.get(&truncate_to_minute(timestamp))
    }

    pub fn bucket_mut(&mut self, timestamp: DateTime<Utc>) -> Option<&mut TimeBucket> {
        self.buckets.get_mut(&truncate_to_minute(timestamp))
    }

    pub fn current_bucket(&self) -> Option<&TimeBucket> {
        self.current.and_then(|key| self.buckets.get(&key))
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.buckets.keys().next_back().copied()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.buckets.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Every symbol with at least one record anywhere in the store.
    pub fn symbols(&self) -> BTreeSet<String> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.symbols().map(str::to_string))
            .collect()
    }

    /// Cloned records of one bucket, e.g. for persistence.
    pub fn records(&self, timestamp: DateTime<Utc>) -> Vec<CandleRecord> {
        self.bucket(timestamp)
            .map(|bucket| bucket.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Fill max/min extrema for every record of the bucket at `timestamp`.
    ///
    /// Returns the number of records updated; a negative window updates none.
    pub fn compute_indicators(&mut self, timestamp: DateTime<Utc>, window_minutes: i64) -> usize {
        let end = truncate_to_minute(timestamp);
        let Some(start) = window_start(end, window_minutes) else {
            return 0;
        };
        let Some(target) = self.buckets.get(&end) else {
            return 0;
        };

        let computed: Vec<(String, Option<Extremes>)> = target
            .records()
            .map(|record| {
                let series = self.buckets.range(start..=end).filter_map(|(ts, bucket)| {
                    bucket.get(&record.symbol).map(|other| (*ts, &other.ohlcv))
                });
                (
                    record.symbol.clone(),
                    scan_extremes(series, end, record.ohlcv.close),
                )
            })
            .collect();

        self.apply(end, computed, |record, extremes| record.extremes = extremes)
    }

    /// Fill the impact rate of every record of the bucket at `timestamp`
    /// against `reference`.
    ///
    /// Requires [`compute_indicators`](Self::compute_indicators) to have run
    /// for the bucket. The reference itself always gets exactly 1; every other
    /// record stays `None` when the reference is absent from the bucket or no
    /// bucket in the window holds both symbols.
    pub fn compute_btc_impact(
        &mut self,
        timestamp: DateTime<Utc>,
        reference: &str,
        window_minutes: i64,
    ) -> usize {
        let end = truncate_to_minute(timestamp);
        let Some(start) = window_start(end, window_minutes) else {
            return 0;
        };
        let Some(target) = self.buckets.get(&end) else {
            return 0;
        };

        let reference_range = target
            .get(reference)
            .and_then(|record| record.extremes)
            .map(|extremes| (extremes.min_price, extremes.max_price));

        let computed: Vec<(String, Option<Decimal>)> = target
            .records()
            .map(|record| {
                if record.symbol == reference {
                    return (record.symbol.clone(), Some(Decimal::ONE));
                }
                let impact = match (record.extremes, reference_range) {
                    (Some(extremes), Some(reference_range)) => {
                        let closes = self.buckets.range(start..=end).filter_map(|(_, bucket)| {
                            let own = bucket.get(&record.symbol)?;
                            let other = bucket.get(reference)?;
                            Some((own.ohlcv.close, other.ohlcv.close))
                        });
                        impact_rate(
                            closes,
                            (extremes.min_price, extremes.max_price),
                            reference_range,
                        )
                    }
                    _ => None,
                };
                (record.symbol.clone(), impact)
            })
            .collect();

        self.apply(end, computed, |record, impact| record.impact_rate = impact)
    }

    /// Drop every bucket strictly older than `now - window - grace`.
    ///
    /// Returns the number of buckets removed. A negative or out-of-range
    /// retention removes nothing.
    pub fn evict(&mut self, now: DateTime<Utc>, window_minutes: i64, grace_minutes: i64) -> usize {
        if window_minutes < 0 || grace_minutes < 0 {
            return 0;
        }
        let Some(cutoff) = window_minutes
            .checked_add(grace_minutes)
            .and_then(|retention| window_start(now, retention))
        else {
            return 0;
        };
        let before = self.buckets.len();
        self.buckets = self.buckets.split_off(&cutoff);
        if self.current.is_some_and(|key| key < cutoff) {
            self.current = None;
        }
        let evicted = before - self.buckets.len();
        debug!(
            cutoff = %cutoff,
            evicted = evicted,
            remaining = self.buckets.len(),
            "CandleStore: evicted {} buckets older than {}",
            evicted,
            cutoff
        );
        evicted
    }

    /// Bulk-load previously persisted records, keeping their derived fields.
    ///
    /// The current pointer moves to the newest bucket only if none was set.
    pub fn reload(&mut self, records: impl IntoIterator<Item = CandleRecord>) -> usize {
        let mut loaded = 0;
        for record in records {
            let key = truncate_to_minute(record.bucket);
            self.buckets
                .entry(key)
                .or_insert_with(|| TimeBucket::new(key))
                .restore(record);
            loaded += 1;
        }
        if self.current.is_none() {
            self.current = self.latest_timestamp();
        }
        loaded
    }

    fn apply<T>(
        &mut self,
        key: DateTime<Utc>,
        computed: Vec<(String, T)>,
        mut assign: impl FnMut(&mut CandleRecord, T),
    ) -> usize {
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return 0;
        };
        let mut updated = 0;
        for (symbol, value) in computed {
            if let Some(record) = bucket.get_mut(&symbol) {
                assign(record, value);
                updated += 1;
            }
        }
        updated
    }
}
