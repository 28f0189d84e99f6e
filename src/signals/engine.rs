//! Threshold alert decisions over a bucket whose indicators are computed.

use rust_decimal::Decimal;

use crate::models::{quantize, Alert, AlertDirection, CandleRecord};
use crate::signals::sink::AlertSink;
use crate::store::TimeBucket;

/// Alarm fraction the price move must reach, and the impact ratio the
/// reference correlation must not exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertThresholds {
    pub alarm: Decimal,
    pub impact: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            alarm: Decimal::new(1, 1),
            impact: Decimal::new(8, 1),
        }
    }
}

pub struct AlertEngine {
    thresholds: AlertThresholds,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }

    /// Flag and report every record of `bucket` crossing a threshold.
    ///
    /// Growth and decline are checked independently and may both fire. A
    /// record without extrema or impact rate never fires.
    pub fn evaluate(&self, bucket: &mut TimeBucket, sink: &dyn AlertSink) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for record in bucket.records_mut() {
            for (direction, fraction) in self.crossings(record) {
                match direction {
                    AlertDirection::Growth => record.growth_alert = true,
                    AlertDirection::Decline => record.decline_alert = true,
                }
                let alert = Alert {
                    symbol: record.symbol.clone(),
                    bucket: record.bucket,
                    direction,
                    magnitude_percent: quantize(fraction * Decimal::ONE_HUNDRED),
                };
                sink.raise_alert(&alert);
                alerts.push(alert);
            }
        }

        alerts
    }

    fn crossings(&self, record: &CandleRecord) -> Vec<(AlertDirection, Decimal)> {
        let (Some(extremes), Some(impact)) = (record.extremes, record.impact_rate) else {
            return Vec::new();
        };
        if impact > self.thresholds.impact {
            return Vec::new();
        }

        let growth = extremes.delta_to_min_percent.abs();
        let decline = extremes.delta_to_max_percent.abs();

        [
            (AlertDirection::Growth, growth),
            (AlertDirection::Decline, decline),
        ]
        .into_iter()
        .filter(|(_, fraction)| *fraction >= self.thresholds.alarm)
        .collect()
    }
}
