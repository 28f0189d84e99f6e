//! Alert delivery collaborators

use tracing::info;

use crate::models::Alert;

/// Receives every alert the engine raises.
pub trait AlertSink: Send + Sync {
    fn raise_alert(&self, alert: &Alert);
}

/// Default sink: one structured log line per alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise_alert(&self, alert: &Alert) {
        info!(
            symbol = %alert.symbol,
            bucket = %alert.bucket,
            direction = %alert.direction,
            magnitude_percent = %alert.magnitude_percent.round_dp(2),
            "ALERT: {} {} by {:.2}%",
            alert.symbol,
            alert.direction,
            alert.magnitude_percent
        );
    }
}
