//! Alert evaluation and delivery.

pub mod engine;
pub mod sink;

pub use engine::{AlertEngine, AlertThresholds};
pub use sink::{AlertSink, LogAlertSink};
