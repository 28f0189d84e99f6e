//! Unit tests for the in-memory repository

use chrono::{DateTime, Duration, TimeZone, Utc};
use klinewatch::db::{select_registered, CandleRepository, MemoryRepository};
use klinewatch::models::{CandleRecord, Ohlcv, SymbolInfo};
use rust_decimal_macros::dec;

fn minute(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(offset)
}

fn instrument(symbol: &str) -> SymbolInfo {
    SymbolInfo {
        symbol: symbol.to_string(),
        min_leverage: dec!(1),
        max_leverage: dec!(50),
        leverage_step: dec!(0.01),
        min_price: dec!(0.01),
        max_price: dec!(10000),
        tick_size: dec!(0.01),
        min_order_qty: dec!(0.1),
        max_order_qty: dec!(1000),
        qty_step: dec!(0.1),
    }
}

#[tokio::test]
async fn test_save_is_an_upsert() {
    let repository = MemoryRepository::new();
    repository
        .save(&[CandleRecord::new("ETHUSDT", minute(0), Ohlcv::flat(dec!(10)))])
        .await
        .unwrap();

    let mut updated = CandleRecord::new("ETHUSDT", minute(0), Ohlcv::flat(dec!(10)));
    updated.impact_rate = Some(dec!(0.4));
    updated.growth_alert = true;
    repository.save(&[updated.clone()]).await.unwrap();

    assert_eq!(repository.len(), 1);
    assert_eq!(repository.get("ETHUSDT", minute(0)), Some(updated));
}

#[tokio::test]
async fn test_load_since_is_strictly_after_cutoff() {
    let repository = MemoryRepository::new();
    let records: Vec<_> = (0..5)
        .map(|i| CandleRecord::new("ETHUSDT", minute(i), Ohlcv::flat(dec!(10))))
        .collect();
    repository.save(&records).await.unwrap();

    let loaded = repository.load_since(minute(2)).await.unwrap();
    let buckets: Vec<_> = loaded.iter().map(|r| r.bucket).collect();
    assert_eq!(buckets, vec![minute(3), minute(4)]);
}

#[tokio::test]
async fn test_sync_symbols_keeps_base_and_deactivates_rest() {
    let repository = MemoryRepository::with_active_symbols(["BTCUSDT", "DOGEUSDT", "XRPUSDT"]);

    repository
        .sync_symbols(
            &[instrument("ETHUSDT"), instrument("XRPUSDT")],
            &["BTCUSDT".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(
        repository.active_symbols().await.unwrap(),
        vec!["BTCUSDT", "ETHUSDT", "XRPUSDT"]
    );
    assert_eq!(repository.symbol_info("ETHUSDT"), Some(instrument("ETHUSDT")));
    assert!(repository.symbol_info("BTCUSDT").is_none());
}

#[test]
fn test_only_listed_instruments_are_registered() {
    let fetched = vec![instrument("BTCUSDT"), instrument("ETHUSDT"), instrument("XRPUSDT")];
    let wanted = vec!["ETHUSDT".to_string(), "SOLUSDT".to_string()];

    let selected = select_registered(fetched.clone(), &wanted);
    assert_eq!(selected, vec![instrument("ETHUSDT")]);

    assert!(select_registered(fetched, &[]).is_empty());
}
