//! Ingestion and eviction jobs driven by the scheduler

pub mod context;
pub mod handlers;
pub mod ingest;

pub use context::{JobContext, MonitorSettings};
pub use handlers::{handle_evict, handle_ingest_cycle, warm_up, CycleReport};
pub use ingest::KlineIngestor;
