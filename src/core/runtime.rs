//! Scheduler wiring for the ingestion and eviction jobs

use crate::config::Config;
use crate::core::scheduler::{JobCallback, JobOptions, JobScheduler, ScheduleError};
use crate::jobs::context::JobContext;
use crate::jobs::handlers;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const INGEST_JOB: &str = "ingest_klines";
pub const EVICT_JOB: &str = "evict_buckets";

/// Configuration for the job runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub ingest_schedule: String,
    /// Fixed delay after each ingestion fire time, so the exchange has
    /// closed the previous minute's candle.
    pub ingest_delay: Duration,
    pub evict_schedule: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ingest_schedule: "0 * * * * *".to_string(),
            ingest_delay: Duration::from_secs(1),
            evict_schedule: "30 * * * * *".to_string(),
        }
    }
}

impl From<&Config> for RuntimeConfig {
    fn from(config: &Config) -> Self {
        Self {
            ingest_schedule: config.ingest_schedule.clone(),
            ingest_delay: config.ingest_delay,
            evict_schedule: config.evict_schedule.clone(),
        }
    }
}

/// Monitor runtime that registers its jobs on an injected scheduler
pub struct MonitorRuntime {
    config: RuntimeConfig,
    job_context: Arc<JobContext>,
    scheduler: JobScheduler,
}

impl MonitorRuntime {
    pub fn new(config: RuntimeConfig, job_context: Arc<JobContext>, scheduler: JobScheduler) -> Self {
        Self {
            config,
            job_context,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Register both jobs. Fails only on a malformed cron expression.
    pub fn start(&self) -> Result<(), ScheduleError> {
        let ingest_ctx = self.job_context.clone();
        self.scheduler.register(
            INGEST_JOB,
            &self.config.ingest_schedule,
            JobCallback::from_async(move || {
                let ctx = ingest_ctx.clone();
                async move {
                    handlers::handle_ingest_cycle(&ctx, Utc::now()).await?;
                    Ok(())
                }
            }),
            JobOptions {
                delay: self.config.ingest_delay,
                ..JobOptions::default()
            },
        )?;

        let evict_ctx = self.job_context.clone();
        self.scheduler.register(
            EVICT_JOB,
            &self.config.evict_schedule,
            JobCallback::sync(move || {
                handlers::handle_evict(&evict_ctx, Utc::now());
                Ok(())
            }),
            JobOptions::default(),
        )?;

        info!(
            ingest = %self.config.ingest_schedule,
            evict = %self.config.evict_schedule,
            "MonitorRuntime: jobs registered"
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.scheduler.stop_all();
        info!("MonitorRuntime: shutdown requested");
    }
}
