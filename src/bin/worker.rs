//! Klinewatch Worker
//!
//! Polls the exchange every minute, maintains the rolling candle window and
//! raises alerts. Runs until interrupted.

use anyhow::Context;
use chrono::Utc;
use dotenvy::dotenv;
use klinewatch::config::Config;
use klinewatch::core::fanout::{FanoutExecutor, ReqwestTransport};
use klinewatch::core::http::{start_server, AppState};
use klinewatch::core::runtime::{MonitorRuntime, RuntimeConfig};
use klinewatch::core::scheduler::{ErrorPolicy, JobScheduler};
use klinewatch::db::{CandleRepository, MemoryRepository, PostgresRepository};
use klinewatch::jobs::context::{JobContext, MonitorSettings};
use klinewatch::jobs::handlers;
use klinewatch::logging;
use klinewatch::metrics::Metrics;
use klinewatch::services::bybit::BybitClient;
use klinewatch::signals::LogAlertSink;
use klinewatch::store::CandleStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    dotenv().ok();

    let config = Config::from_env();
    logging::init_logging(&config);

    info!("Starting Klinewatch Worker");
    info!(environment = %config.environment, "Environment");

    let metrics = Arc::new(Metrics::new().context("failed to initialize metrics")?);

    info!("Initializing PostgreSQL connection...");
    let repository: Arc<dyn CandleRepository> =
        match PostgresRepository::connect(&config.database_url).await {
            Ok(repository) => {
                info!("PostgreSQL connected");
                Arc::new(repository)
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to PostgreSQL");
                warn!("Running with in-memory history; nothing survives a restart");
                Arc::new(MemoryRepository::new())
            }
        };

    let exchange = Arc::new(BybitClient::from_config(&config.exchange));
    let transport =
        Arc::new(ReqwestTransport::new(&config.http).context("failed to build HTTP client")?);
    let executor = Arc::new(FanoutExecutor::new(
        transport,
        config.http.effective_concurrency(),
    ));
    info!(
        concurrency = executor.max_concurrency(),
        endpoint = %exchange.endpoint(),
        "Fan-out concurrency: {}",
        executor.max_concurrency()
    );

    let store = CandleStore::shared();
    let settings = MonitorSettings::from(&config);
    let job_context = Arc::new(
        JobContext::new(
            store.clone(),
            executor,
            exchange,
            repository,
            Arc::new(LogAlertSink),
            settings,
        )
        .with_metrics(metrics.clone()),
    );

    handlers::warm_up(&job_context, Utc::now())
        .await
        .context("startup warm-up failed")?;

    let symbols = job_context
        .tracked_symbols()
        .await
        .context("failed to resolve tracked symbols")?;
    if symbols.len() <= 1 {
        warn!("No symbols to monitor besides the reference symbol - register symbols or set SYMBOLS");
    } else {
        info!(symbols = ?symbols, "Tracking {} symbols", symbols.len());
    }

    if config.http_port > 0 {
        let state = AppState::new(metrics.clone(), store.clone());
        let port = config.http_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state).await {
                error!(error = %e, "HTTP server failed");
            }
        });
    }

    let error_policy = if config.catch_job_errors {
        ErrorPolicy::CatchAndLog
    } else {
        ErrorPolicy::Propagate
    };
    let scheduler = JobScheduler::new(config.added_delay, error_policy);
    let runtime = MonitorRuntime::new(RuntimeConfig::from(&config), job_context, scheduler);

    info!("Starting job scheduler...");
    runtime.start().context("failed to register jobs")?;

    // Graceful shutdown
    info!("Worker started, waiting for shutdown signal...");
    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down worker...");
    runtime.shutdown();
    info!("Worker stopped");

    Ok(())
}
