//! Bybit v5 response parsing

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use super::ExchangeError;
use crate::models::{quantize, truncate_to_minute, Ohlcv, SymbolInfo};

/// Entry used from `result.list`: index 0 is the candle still forming,
/// index 1 the last fully closed one.
const CLOSED_CANDLE_INDEX: usize = 1;

/// The closed candle extracted from a kline response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineSnapshot {
    pub symbol: String,
    pub bucket: DateTime<Utc>,
    pub ohlcv: Ohlcv,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    symbol: String,
    list: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResult {
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    leverage_filter: LeverageFilter,
    price_filter: PriceFilter,
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverageFilter {
    min_leverage: String,
    max_leverage: String,
    leverage_step: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceFilter {
    min_price: String,
    max_price: String,
    tick_size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    min_order_qty: String,
    max_order_qty: String,
    qty_step: String,
}

fn unwrap_envelope<T: DeserializeOwned>(value: &Value) -> Result<T, ExchangeError> {
    let envelope = Envelope::deserialize(value)
        .map_err(|e| ExchangeError::MalformedResponse(e.to_string()))?;
    if envelope.ret_code != 0 {
        return Err(ExchangeError::Rejected {
            code: envelope.ret_code,
            message: envelope.ret_msg,
        });
    }
    if envelope.result.is_null() {
        return Err(ExchangeError::MalformedResponse("missing result".to_string()));
    }
    T::deserialize(envelope.result).map_err(|e| ExchangeError::MalformedResponse(e.to_string()))
}

/// Parse an exchange decimal string, quantized to the store precision.
pub fn parse_decimal(raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map(quantize)
        .map_err(|_| ExchangeError::MalformedResponse(format!("not a decimal: {raw:?}")))
}

/// Extract the last closed candle from a `/v5/market/kline` response.
pub fn parse_kline_response(value: &Value) -> Result<KlineSnapshot, ExchangeError> {
    let result: KlineResult = unwrap_envelope(value)?;
    let entry = result.list.get(CLOSED_CANDLE_INDEX).ok_or_else(|| {
        ExchangeError::MalformedResponse(format!(
            "expected at least {} candles, got {}",
            CLOSED_CANDLE_INDEX + 1,
            result.list.len()
        ))
    })?;
    if entry.len() < 7 {
        return Err(ExchangeError::MalformedResponse(format!(
            "candle has {} fields, expected 7",
            entry.len()
        )));
    }

    let timestamp_ms: i64 = entry[0]
        .parse()
        .map_err(|_| ExchangeError::MalformedResponse(format!("bad timestamp {:?}", entry[0])))?;
    let bucket = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        ExchangeError::MalformedResponse(format!("timestamp out of range: {timestamp_ms}"))
    })?;

    Ok(KlineSnapshot {
        symbol: result.symbol,
        bucket: truncate_to_minute(bucket),
        ohlcv: Ohlcv::new(
            parse_decimal(&entry[1])?,
            parse_decimal(&entry[2])?,
            parse_decimal(&entry[3])?,
            parse_decimal(&entry[4])?,
            parse_decimal(&entry[5])?,
            parse_decimal(&entry[6])?,
        ),
    })
}

/// Extract instrument constraints from a `/v5/market/instruments-info` response.
pub fn parse_instruments(value: &Value) -> Result<Vec<SymbolInfo>, ExchangeError> {
    let result: InstrumentsResult = unwrap_envelope(value)?;
    result
        .list
        .into_iter()
        .map(|instrument| {
            Ok(SymbolInfo {
                symbol: instrument.symbol,
                min_leverage: parse_decimal(&instrument.leverage_filter.min_leverage)?,
                max_leverage: parse_decimal(&instrument.leverage_filter.max_leverage)?,
                leverage_step: parse_decimal(&instrument.leverage_filter.leverage_step)?,
                min_price: parse_decimal(&instrument.price_filter.min_price)?,
                max_price: parse_decimal(&instrument.price_filter.max_price)?,
                tick_size: parse_decimal(&instrument.price_filter.tick_size)?,
                min_order_qty: parse_decimal(&instrument.lot_size_filter.min_order_qty)?,
                max_order_qty: parse_decimal(&instrument.lot_size_filter.max_order_qty)?,
                qty_step: parse_decimal(&instrument.lot_size_filter.qty_step)?,
            })
        })
        .collect()
}
