//! Persistence collaborators for candle history and tracked symbols.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{CandleRecord, SymbolInfo};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] tokio_postgres::Error),
    #[error("{context}: {source}")]
    Query {
        context: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },
}

impl RepositoryError {
    pub(crate) fn query(context: &'static str) -> impl FnOnce(tokio_postgres::Error) -> Self {
        move |source| Self::Query { context, source }
    }
}

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Upsert records keyed by `(symbol, bucket)`.
    async fn save(&self, records: &[CandleRecord]) -> Result<(), RepositoryError>;

    /// Every record whose bucket is strictly after `cutoff`.
    async fn load_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CandleRecord>, RepositoryError>;

    /// Symbols currently flagged active, sorted.
    async fn active_symbols(&self) -> Result<Vec<String>, RepositoryError>;

    /// Deactivate every symbol not in `base`, then upsert `symbols` as active.
    async fn sync_symbols(&self, symbols: &[SymbolInfo], base: &[String]) -> Result<(), RepositoryError>;
}

/// Instruments to register: only those listed in `wanted`, none when it is
/// empty.
pub fn select_registered(instruments: Vec<SymbolInfo>, wanted: &[String]) -> Vec<SymbolInfo> {
    instruments
        .into_iter()
        .filter(|info| wanted.contains(&info.symbol))
        .collect()
}
