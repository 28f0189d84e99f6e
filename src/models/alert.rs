use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertDirection {
    /// Close moved up from the window minimum.
    Growth,
    /// Close moved down from the window maximum.
    Decline,
}

impl fmt::Display for AlertDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertDirection::Growth => write!(f, "growth"),
            AlertDirection::Decline => write!(f, "decline"),
        }
    }
}

/// A threshold crossing raised for one record of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub bucket: DateTime<Utc>,
    pub direction: AlertDirection,
    /// Absolute move in percent (0.1 fraction => 10).
    pub magnitude_percent: Decimal,
}
