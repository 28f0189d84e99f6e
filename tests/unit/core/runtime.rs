//! Unit tests for the monitor runtime

use klinewatch::config::Config;
use klinewatch::core::fanout::{FanoutExecutor, Transport, TransportResponse};
use klinewatch::core::runtime::{MonitorRuntime, RuntimeConfig, EVICT_JOB, INGEST_JOB};
use klinewatch::core::scheduler::JobScheduler;
use klinewatch::db::MemoryRepository;
use klinewatch::jobs::{JobContext, MonitorSettings};
use klinewatch::services::bybit::BybitClient;
use klinewatch::services::RequestDescriptor;
use klinewatch::signals::LogAlertSink;
use klinewatch::store::CandleStore;
use std::sync::Arc;
use std::time::Duration;

struct UnreachableTransport;

#[async_trait::async_trait]
impl Transport for UnreachableTransport {
    async fn send(
        &self,
        _request: &RequestDescriptor,
    ) -> Result<TransportResponse, Box<dyn std::error::Error + Send + Sync>> {
        Err("offline".into())
    }
}

fn job_context() -> Arc<JobContext> {
    Arc::new(JobContext::new(
        CandleStore::shared(),
        Arc::new(FanoutExecutor::new(Arc::new(UnreachableTransport), 4)),
        Arc::new(BybitClient::new(false)),
        Arc::new(MemoryRepository::new()),
        Arc::new(LogAlertSink),
        MonitorSettings::default(),
    ))
}

#[test]
fn test_runtime_config_default() {
    let config = RuntimeConfig::default();
    assert_eq!(config.ingest_schedule, "0 * * * * *");
    assert_eq!(config.ingest_delay, Duration::from_secs(1));
    assert_eq!(config.evict_schedule, "30 * * * * *");
}

#[test]
fn test_runtime_config_from_app_config() {
    let config = Config {
        ingest_schedule: "*/2 * * * *".to_string(),
        ingest_delay: Duration::from_millis(250),
        ..Config::default()
    };
    let runtime = RuntimeConfig::from(&config);
    assert_eq!(runtime.ingest_schedule, "*/2 * * * *");
    assert_eq!(runtime.ingest_delay, Duration::from_millis(250));
    assert_eq!(runtime.evict_schedule, config.evict_schedule);
}

#[tokio::test]
async fn test_start_registers_both_jobs() {
    let runtime = MonitorRuntime::new(RuntimeConfig::default(), job_context(), JobScheduler::default());
    runtime.start().unwrap();

    assert_eq!(
        runtime.scheduler().job_names(),
        vec![EVICT_JOB.to_string(), INGEST_JOB.to_string()]
    );
    let ingest = runtime.scheduler().job(INGEST_JOB).unwrap();
    assert_eq!(ingest.options().delay, Duration::from_secs(1));

    runtime.shutdown();
    assert!(runtime.scheduler().job_names().is_empty());
    assert!(!ingest.is_active());
}

#[tokio::test]
async fn test_start_fails_on_malformed_cron() {
    let config = RuntimeConfig {
        evict_schedule: "not a cron".to_string(),
        ..RuntimeConfig::default()
    };
    let runtime = MonitorRuntime::new(config, job_context(), JobScheduler::default());
    assert!(runtime.start().is_err());
    runtime.shutdown();
}
