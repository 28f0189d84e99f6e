//! In-process repository, used when no database is reachable and in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{CandleRepository, RepositoryError};
use crate::models::{CandleRecord, SymbolInfo};

#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: Mutex<BTreeMap<(DateTime<Utc>, String), CandleRecord>>,
    symbols: Mutex<BTreeMap<String, (Option<SymbolInfo>, bool)>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `symbols` registered as active.
    pub fn with_active_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let repository = Self::new();
        {
            let mut registered = repository.symbols.lock();
            for symbol in symbols {
                registered.insert(symbol.into(), (None, true));
            }
        }
        repository
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn get(&self, symbol: &str, bucket: DateTime<Utc>) -> Option<CandleRecord> {
        self.records
            .lock()
            .get(&(bucket, symbol.to_string()))
            .cloned()
    }

    pub fn symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        self.symbols
            .lock()
            .get(symbol)
            .and_then(|(info, _)| info.clone())
    }
}

#[async_trait]
impl CandleRepository for MemoryRepository {
    async fn save(&self, records: &[CandleRecord]) -> Result<(), RepositoryError> {
        let mut stored = self.records.lock();
        for record in records {
            stored.insert((record.bucket, record.symbol.clone()), record.clone());
        }
        Ok(())
    }

    async fn load_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CandleRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|record| record.bucket > cutoff)
            .cloned()
            .collect())
    }

    async fn active_symbols(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .symbols
            .lock()
            .iter()
            .filter(|(_, (_, active))| *active)
            .map(|(symbol, _)| symbol.clone())
            .collect())
    }

    async fn sync_symbols(&self, symbols: &[SymbolInfo], base: &[String]) -> Result<(), RepositoryError> {
        let mut registered = self.symbols.lock();
        for (symbol, (_, active)) in registered.iter_mut() {
            if !base.contains(symbol) {
                *active = false;
            }
        }
        for info in symbols {
            registered.insert(info.symbol.clone(), (Some(info.clone()), true));
        }
        Ok(())
    }
}
