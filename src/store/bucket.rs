use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::models::{truncate_to_minute, CandleRecord, Ohlcv};

/// All candles collected for one minute, at most one per symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket {
    timestamp: DateTime<Utc>,
    records: BTreeMap<String, CandleRecord>,
}

impl TimeBucket {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: truncate_to_minute(timestamp),
            records: BTreeMap::new(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Write a fresh record for `symbol`, replacing any earlier one.
    pub fn upsert(&mut self, symbol: &str, ohlcv: Ohlcv) -> &CandleRecord {
        let record = CandleRecord::new(symbol, self.timestamp, ohlcv);
        self.records.insert(symbol.to_string(), record);
        &self.records[symbol]
    }

    /// Keep a previously persisted record with its derived fields intact.
    pub(crate) fn restore(&mut self, mut record: CandleRecord) {
        record.bucket = self.timestamp;
        self.records.insert(record.symbol.clone(), record);
    }

    pub fn get(&self, symbol: &str) -> Option<&CandleRecord> {
        self.records.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut CandleRecord> {
        self.records.get_mut(symbol)
    }

    pub fn records(&self) -> impl Iterator<Item = &CandleRecord> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut CandleRecord> {
        self.records.values_mut()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
