//! Job context for dependency injection

use crate::config::Config;
use crate::core::fanout::FanoutExecutor;
use crate::db::{CandleRepository, RepositoryError};
use crate::metrics::Metrics;
use crate::services::market_data::KlineRequestSource;
use crate::signals::{AlertSink, AlertThresholds};
use crate::store::SharedCandleStore;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Tunables of the monitoring pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub window_minutes: i64,
    pub grace_minutes: i64,
    pub reference_symbol: String,
    pub thresholds: AlertThresholds,
    /// Fixed symbol list; when empty, active symbols come from the repository.
    pub symbols: Vec<String>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            grace_minutes: 5,
            reference_symbol: "BTCUSDT".to_string(),
            thresholds: AlertThresholds {
                alarm: Decimal::new(1, 1),
                impact: Decimal::new(8, 1),
            },
            symbols: Vec::new(),
        }
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            window_minutes: config.tracking_period_minutes,
            grace_minutes: config.eviction_grace_minutes,
            reference_symbol: config.reference_symbol.clone(),
            thresholds: AlertThresholds {
                alarm: config.alarm_threshold,
                impact: config.impact_threshold,
            },
            symbols: config.symbols.clone(),
        }
    }
}

/// Context shared by the ingestion and eviction jobs
///
/// The candle store is the only mutable state; every other member is a
/// collaborator the handlers call through.
pub struct JobContext {
    pub store: SharedCandleStore,
    pub executor: Arc<FanoutExecutor>,
    pub exchange: Arc<dyn KlineRequestSource>,
    pub repository: Arc<dyn CandleRepository>,
    pub alert_sink: Arc<dyn AlertSink>,
    pub metrics: Option<Arc<Metrics>>,
    pub settings: MonitorSettings,
}

impl JobContext {
    pub fn new(
        store: SharedCandleStore,
        executor: Arc<FanoutExecutor>,
        exchange: Arc<dyn KlineRequestSource>,
        repository: Arc<dyn CandleRepository>,
        alert_sink: Arc<dyn AlertSink>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            store,
            executor,
            exchange,
            repository,
            alert_sink,
            metrics: None,
            settings,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Symbols fetched each cycle, always including the reference symbol.
    pub async fn tracked_symbols(&self) -> Result<Vec<String>, RepositoryError> {
        let mut symbols = if self.settings.symbols.is_empty() {
            self.repository.active_symbols().await?
        } else {
            self.settings.symbols.clone()
        };
        if !symbols.contains(&self.settings.reference_symbol) {
            symbols.push(self.settings.reference_symbol.clone());
        }
        Ok(symbols)
    }
}
