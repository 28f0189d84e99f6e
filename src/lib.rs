//! klinewatch: minute-candle monitoring with rolling-window alerts.

pub mod config;
pub mod core;
pub mod db;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod signals;
pub mod store;
