//! Symbol registration
//!
//! Fetches the exchange's instrument list, keeps the symbols named in
//! `SYMBOLS`, and marks them active in the database. Symbols outside
//! `BASE_SYMBOLS` that are not in the new list are deactivated. Refuses to
//! run with `SYMBOLS` unset.

use anyhow::{bail, Context};
use dotenvy::dotenv;
use klinewatch::config::Config;
use klinewatch::core::fanout::{FanoutExecutor, PendingRequest, ReqwestTransport, ResultSink};
use klinewatch::db::{select_registered, CandleRepository, PostgresRepository};
use klinewatch::logging;
use klinewatch::services::bybit::{parse_instruments, BybitClient};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env();
    logging::init_logging(&config);

    if config.symbols.is_empty() {
        bail!("SYMBOLS is empty; set it to the comma-separated symbols to register");
    }

    let client = BybitClient::from_config(&config.exchange);
    let transport =
        Arc::new(ReqwestTransport::new(&config.http).context("failed to build HTTP client")?);
    let executor = FanoutExecutor::new(transport, 1);

    let (sink, slot) = ResultSink::slot();
    let request = client
        .get_instruments_info()
        .context("failed to build instruments request")?;
    executor.run(vec![PendingRequest::new(request, sink)]).await;

    let Some(outcome) = slot.lock().take() else {
        bail!("instruments request produced no result");
    };
    let succeeded = outcome.is_success();
    let Some(body) = outcome.result.filter(|_| succeeded) else {
        bail!("instruments request failed with status {}", outcome.status);
    };

    let instruments = select_registered(
        parse_instruments(&body).context("failed to parse instruments")?,
        &config.symbols,
    );
    info!(
        count = instruments.len(),
        "Selected {} instruments from {}",
        instruments.len(),
        client.endpoint()
    );

    let repository = PostgresRepository::connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    repository
        .sync_symbols(&instruments, &config.base_symbols)
        .await
        .context("failed to register symbols")?;

    info!("Symbol registration complete");
    Ok(())
}
