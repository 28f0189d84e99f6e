//! Rolling-window math over one symbol's candles.
//!
//! Every intermediate result is quantized to [`PRICE_SCALE`] digits so that
//! values reloaded from storage reproduce the same indicators bit for bit.
//!
//! [`PRICE_SCALE`]: crate::models::PRICE_SCALE

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{quantize, Extremes, Ohlcv};

/// Scan `series` (ascending by bucket) for the highest high and lowest low.
///
/// The first bucket attaining an extreme keeps it; later equal values do not
/// replace it. Returns `None` for an empty series.
pub fn scan_extremes<'a, I>(series: I, end: DateTime<Utc>, close: Decimal) -> Option<Extremes>
where
    I: IntoIterator<Item = (DateTime<Utc>, &'a Ohlcv)>,
{
    let mut found: Option<((Decimal, DateTime<Utc>), (Decimal, DateTime<Utc>))> = None;

    for (ts, candle) in series {
        match found.as_mut() {
            None => found = Some(((candle.high, ts), (candle.low, ts))),
            Some((max, min)) => {
                if candle.high > max.0 {
                    *max = (candle.high, ts);
                }
                if candle.low < min.0 {
                    *min = (candle.low, ts);
                }
            }
        }
    }

    let ((max_price, max_at), (min_price, min_at)) = found?;
    let delta_to_max = quantize(close - max_price);
    let delta_to_min = quantize(close - min_price);

    Some(Extremes {
        max_price,
        delta_to_max,
        delta_to_max_percent: ratio(delta_to_max, max_price),
        time_since_max: (end - max_at).num_minutes(),
        min_price,
        delta_to_min,
        delta_to_min_percent: ratio(delta_to_min, min_price),
        time_since_min: (end - min_at).num_minutes(),
    })
}

/// Position of `value` inside `[min, max]`, scaled to `0..=1`.
///
/// A zero-width range maps every value to 0.
pub fn normalize(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    let range = quantize(max - min);
    if range.is_zero() {
        return Decimal::ZERO;
    }
    ratio(quantize(value - min), range)
}

/// Similarity of two normalized close paths: `1 - mean(|a - b|)`.
///
/// `closes` yields `(symbol_close, reference_close)` for every bucket where
/// both symbols have a record. Ranges are `(min, max)`. Returns `None` when
/// no aligned bucket exists.
pub fn impact_rate<I>(
    closes: I,
    symbol_range: (Decimal, Decimal),
    reference_range: (Decimal, Decimal),
) -> Option<Decimal>
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let mut deviation_sum = Decimal::ZERO;
    let mut aligned: u32 = 0;

    for (close, reference_close) in closes {
        let own = normalize(close, symbol_range.0, symbol_range.1);
        let reference = normalize(reference_close, reference_range.0, reference_range.1);
        deviation_sum = quantize(deviation_sum + quantize(own - reference).abs());
        aligned += 1;
    }

    if aligned == 0 {
        return None;
    }

    Some(quantize(
        Decimal::ONE - ratio(deviation_sum, Decimal::from(aligned)),
    ))
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    numerator
        .checked_div(denominator)
        .map(quantize)
        .unwrap_or(Decimal::ZERO)
}
