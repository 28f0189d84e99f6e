use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fractional digits every price, ratio and percent is quantized to.
pub const PRICE_SCALE: u32 = 9;

/// Round to [`PRICE_SCALE`] digits (banker's rounding).
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp(PRICE_SCALE)
}

/// Truncate a timestamp to the start of its UTC minute.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::seconds(i64::from(ts.second()))
        - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

/// One-minute OHLCV summary as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
}

impl Ohlcv {
    pub fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        turnover: Decimal,
    ) -> Self {
        Self {
            open: quantize(open),
            high: quantize(high),
            low: quantize(low),
            close: quantize(close),
            volume: quantize(volume),
            turnover: quantize(turnover),
        }
    }

    /// A candle that traded at a single price with no volume.
    pub fn flat(price: Decimal) -> Self {
        Self::new(price, price, price, price, Decimal::ZERO, Decimal::ZERO)
    }
}

/// Rolling-window extrema of one symbol, relative to its current close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extremes {
    pub max_price: Decimal,
    pub delta_to_max: Decimal,
    pub delta_to_max_percent: Decimal,
    pub time_since_max: i64,
    pub min_price: Decimal,
    pub delta_to_min: Decimal,
    pub delta_to_min_percent: Decimal,
    pub time_since_min: i64,
}

/// A symbol's candle in one bucket plus everything derived from the window.
///
/// Identity is `(symbol, bucket)`. `extremes` and `impact_rate` stay `None`
/// until the indicator pass has enough history to define them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub symbol: String,
    pub bucket: DateTime<Utc>,
    pub ohlcv: Ohlcv,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extremes: Option<Extremes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_rate: Option<Decimal>,
    pub growth_alert: bool,
    pub decline_alert: bool,
}

impl CandleRecord {
    pub fn new(symbol: impl Into<String>, bucket: DateTime<Utc>, ohlcv: Ohlcv) -> Self {
        Self {
            symbol: symbol.into(),
            bucket: truncate_to_minute(bucket),
            ohlcv,
            extremes: None,
            impact_rate: None,
            growth_alert: false,
            decline_alert: false,
        }
    }
}
