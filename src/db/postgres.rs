//! PostgreSQL repository for candle history and tracked symbols

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use super::{CandleRepository, RepositoryError};
use crate::models::{CandleRecord, Extremes, Ohlcv, SymbolInfo};

const UPSERT_KLINE: &str = "INSERT INTO kline_history (
        time_kline, symbol_key, open_price, high_price, low_price, close_price, volume, turnover,
        max_price, delta_to_max, delta_to_max_in_percent, time_since_max,
        min_price, delta_to_min, delta_to_min_in_percent, time_since_min,
        btc_impact_rate, is_growth, is_decline
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
    ON CONFLICT (symbol_key, time_kline) DO UPDATE SET
        open_price = EXCLUDED.open_price,
        high_price = EXCLUDED.high_price,
        low_price = EXCLUDED.low_price,
        close_price = EXCLUDED.close_price,
        volume = EXCLUDED.volume,
        turnover = EXCLUDED.turnover,
        max_price = EXCLUDED.max_price,
        delta_to_max = EXCLUDED.delta_to_max,
        delta_to_max_in_percent = EXCLUDED.delta_to_max_in_percent,
        time_since_max = EXCLUDED.time_since_max,
        min_price = EXCLUDED.min_price,
        delta_to_min = EXCLUDED.delta_to_min,
        delta_to_min_in_percent = EXCLUDED.delta_to_min_in_percent,
        time_since_min = EXCLUDED.time_since_min,
        btc_impact_rate = EXCLUDED.btc_impact_rate,
        is_growth = EXCLUDED.is_growth,
        is_decline = EXCLUDED.is_decline";

const SELECT_KLINES_SINCE: &str = "SELECT
        time_kline, symbol_key, open_price, high_price, low_price, close_price, volume, turnover,
        max_price, delta_to_max, delta_to_max_in_percent, time_since_max,
        min_price, delta_to_min, delta_to_min_in_percent, time_since_min,
        btc_impact_rate, is_growth, is_decline
    FROM kline_history
    WHERE time_kline > $1
    ORDER BY time_kline, symbol_key";

const UPSERT_SYMBOL: &str = "INSERT INTO symbol (
        symbol, min_leverage, max_leverage, leverage_step, min_price, max_price,
        tick_size, min_order_qty, max_order_qty, qty_step, is_active
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE)
    ON CONFLICT (symbol) DO UPDATE SET
        min_leverage = EXCLUDED.min_leverage,
        max_leverage = EXCLUDED.max_leverage,
        leverage_step = EXCLUDED.leverage_step,
        min_price = EXCLUDED.min_price,
        max_price = EXCLUDED.max_price,
        tick_size = EXCLUDED.tick_size,
        min_order_qty = EXCLUDED.min_order_qty,
        max_order_qty = EXCLUDED.max_order_qty,
        qty_step = EXCLUDED.qty_step,
        is_active = TRUE";

pub struct PostgresRepository {
    client: Arc<RwLock<Option<Client>>>,
}

impl PostgresRepository {
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(RepositoryError::Connect)?;

        // Spawn connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        let repository = Self {
            client: Arc::new(RwLock::new(Some(client))),
        };
        repository.init_schema().await?;
        info!("PostgresRepository: schema ready");

        Ok(repository)
    }

    async fn init_schema(&self) -> Result<(), RepositoryError> {
        let client = self.client.read().await;
        if let Some(ref c) = *client {
            c.execute(
                "CREATE TABLE IF NOT EXISTS symbol (
                    symbol VARCHAR(15) PRIMARY KEY,
                    min_leverage NUMERIC(19, 9) NOT NULL DEFAULT 1,
                    max_leverage NUMERIC(19, 9) NOT NULL DEFAULT 25,
                    leverage_step NUMERIC(19, 9) NOT NULL DEFAULT 0.01,
                    min_price NUMERIC(19, 9) NOT NULL DEFAULT 0.01,
                    max_price NUMERIC(19, 9) NOT NULL DEFAULT 10000,
                    tick_size NUMERIC(19, 9) NOT NULL DEFAULT 0.01,
                    min_order_qty NUMERIC(19, 9) NOT NULL DEFAULT 0.1,
                    max_order_qty NUMERIC(19, 9) NOT NULL DEFAULT 1000000,
                    qty_step NUMERIC(19, 9) NOT NULL DEFAULT 0.1,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE
                )",
                &[],
            )
            .await
            .map_err(RepositoryError::query("failed to create symbol table"))?;

            c.execute(
                "CREATE TABLE IF NOT EXISTS kline_history (
                    time_kline TIMESTAMPTZ NOT NULL,
                    symbol_key VARCHAR(15) NOT NULL,
                    open_price NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    high_price NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    low_price NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    close_price NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    volume NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    turnover NUMERIC(19, 9) NOT NULL DEFAULT 0,
                    max_price NUMERIC(19, 9),
                    delta_to_max NUMERIC(19, 9),
                    delta_to_max_in_percent NUMERIC(19, 9),
                    time_since_max BIGINT,
                    min_price NUMERIC(19, 9),
                    delta_to_min NUMERIC(19, 9),
                    delta_to_min_in_percent NUMERIC(19, 9),
                    time_since_min BIGINT,
                    btc_impact_rate NUMERIC(19, 9),
                    is_growth BOOLEAN NOT NULL DEFAULT FALSE,
                    is_decline BOOLEAN NOT NULL DEFAULT FALSE,
                    CONSTRAINT key_time PRIMARY KEY (symbol_key, time_kline)
                )",
                &[],
            )
            .await
            .map_err(RepositoryError::query("failed to create kline_history table"))?;

            c.execute(
                "CREATE INDEX IF NOT EXISTS kline_history_time_idx ON kline_history (time_kline)",
                &[],
            )
            .await
            .map_err(RepositoryError::query("failed to create kline_history index"))?;
        }

        Ok(())
    }

    /// Check if the connection is available
    pub async fn is_available(&self) -> bool {
        let client = self.client.read().await;
        client.is_some()
    }
}

fn record_from_row(row: &Row) -> CandleRecord {
    let bucket: DateTime<Utc> = row.get(0);
    let symbol: String = row.get(1);
    let ohlcv = Ohlcv::new(
        row.get(2),
        row.get(3),
        row.get(4),
        row.get(5),
        row.get(6),
        row.get(7),
    );

    let max_price: Option<Decimal> = row.get(8);
    let delta_to_max: Option<Decimal> = row.get(9);
    let delta_to_max_percent: Option<Decimal> = row.get(10);
    let time_since_max: Option<i64> = row.get(11);
    let min_price: Option<Decimal> = row.get(12);
    let delta_to_min: Option<Decimal> = row.get(13);
    let delta_to_min_percent: Option<Decimal> = row.get(14);
    let time_since_min: Option<i64> = row.get(15);

    let extremes = match (
        max_price,
        delta_to_max,
        delta_to_max_percent,
        time_since_max,
        min_price,
        delta_to_min,
        delta_to_min_percent,
        time_since_min,
    ) {
        (
            Some(max_price),
            Some(delta_to_max),
            Some(delta_to_max_percent),
            Some(time_since_max),
            Some(min_price),
            Some(delta_to_min),
            Some(delta_to_min_percent),
            Some(time_since_min),
        ) => Some(Extremes {
            max_price,
            delta_to_max,
            delta_to_max_percent,
            time_since_max,
            min_price,
            delta_to_min,
            delta_to_min_percent,
            time_since_min,
        }),
        _ => None,
    };

    let mut record = CandleRecord::new(symbol, bucket, ohlcv);
    record.extremes = extremes;
    record.impact_rate = row.get(16);
    record.growth_alert = row.get(17);
    record.decline_alert = row.get(18);
    record
}

#[async_trait]
impl CandleRepository for PostgresRepository {
    async fn save(&self, records: &[CandleRecord]) -> Result<(), RepositoryError> {
        let client = self.client.read().await;
        let Some(ref c) = *client else {
            return Ok(());
        };

        let statement = c
            .prepare(UPSERT_KLINE)
            .await
            .map_err(RepositoryError::query("failed to prepare kline upsert"))?;

        for record in records {
            let extremes = record.extremes.as_ref();
            c.execute(
                &statement,
                &[
                    &record.bucket,
                    &record.symbol,
                    &record.ohlcv.open,
                    &record.ohlcv.high,
                    &record.ohlcv.low,
                    &record.ohlcv.close,
                    &record.ohlcv.volume,
                    &record.ohlcv.turnover,
                    &extremes.map(|e| e.max_price),
                    &extremes.map(|e| e.delta_to_max),
                    &extremes.map(|e| e.delta_to_max_percent),
                    &extremes.map(|e| e.time_since_max),
                    &extremes.map(|e| e.min_price),
                    &extremes.map(|e| e.delta_to_min),
                    &extremes.map(|e| e.delta_to_min_percent),
                    &extremes.map(|e| e.time_since_min),
                    &record.impact_rate,
                    &record.growth_alert,
                    &record.decline_alert,
                ],
            )
            .await
            .map_err(RepositoryError::query("failed to store kline"))?;
        }

        debug!(count = records.len(), "PostgresRepository: stored {} klines", records.len());
        Ok(())
    }

    async fn load_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<CandleRecord>, RepositoryError> {
        let client = self.client.read().await;
        let Some(ref c) = *client else {
            return Ok(Vec::new());
        };

        let rows = c
            .query(SELECT_KLINES_SINCE, &[&cutoff])
            .await
            .map_err(RepositoryError::query("failed to query kline history"))?;

        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn active_symbols(&self) -> Result<Vec<String>, RepositoryError> {
        let client = self.client.read().await;
        let Some(ref c) = *client else {
            return Ok(Vec::new());
        };

        let rows = c
            .query(
                "SELECT symbol FROM symbol WHERE is_active = TRUE ORDER BY symbol",
                &[],
            )
            .await
            .map_err(RepositoryError::query("failed to query active symbols"))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn sync_symbols(&self, symbols: &[SymbolInfo], base: &[String]) -> Result<(), RepositoryError> {
        let mut client = self.client.write().await;
        let Some(ref mut c) = *client else {
            return Ok(());
        };

        let transaction = c
            .transaction()
            .await
            .map_err(RepositoryError::query("failed to open transaction"))?;

        transaction
            .execute(
                "UPDATE symbol SET is_active = FALSE WHERE NOT (symbol = ANY($1))",
                &[&base],
            )
            .await
            .map_err(RepositoryError::query("failed to deactivate symbols"))?;

        for info in symbols {
            transaction
                .execute(
                    UPSERT_SYMBOL,
                    &[
                        &info.symbol,
                        &info.min_leverage,
                        &info.max_leverage,
                        &info.leverage_step,
                        &info.min_price,
                        &info.max_price,
                        &info.tick_size,
                        &info.min_order_qty,
                        &info.max_order_qty,
                        &info.qty_step,
                    ],
                )
                .await
                .map_err(RepositoryError::query("failed to upsert symbol"))?;
        }

        transaction
            .commit()
            .await
            .map_err(RepositoryError::query("failed to commit symbol sync"))?;

        info!(
            count = symbols.len(),
            "PostgresRepository: registered {} active symbols",
            symbols.len()
        );
        Ok(())
    }
}
