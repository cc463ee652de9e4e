//! tg-trader entry point: orders in on stdin, outcomes out on stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tg_broker_paper::{PaperVenue, DEFAULT_PAPER_ACCOUNT_VALUE_MICROS};
use tg_execution::{alerter_for, BrokerAdapter, RetryPolicy};
use tg_runtime::TradingSession;
use tokio::io::BufReader;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = tg_config::config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let (loaded, cfg) = tg_config::load_guard_config(&path_refs)?;
    let secrets = tg_config::secrets::resolve_secrets(&cfg)?;
    let limits = cfg.safety_limits()?;
    info!(config_hash = %loaded.config_hash, layers = ?paths, "config loaded");

    let pool = tg_db::open(&cfg.store.db_path)
        .await
        .with_context(|| format!("open store {}", cfg.store.db_path))?;
    let venue = PaperVenue::open(&cfg.broker.venue_path, DEFAULT_PAPER_ACCOUNT_VALUE_MICROS)?;
    let broker: Arc<dyn BrokerAdapter> = Arc::new(venue.connect(cfg.trading.client_id.clone()));
    let alerter = alerter_for(
        secrets.alert_webhook_url.as_deref(),
        cfg.broker.request_timeout(),
    )?;

    let session = TradingSession::new(
        pool,
        broker,
        alerter,
        limits,
        RetryPolicy::from_config(&cfg.broker),
        Duration::from_millis(cfg.trading.heartbeat_interval_ms),
    )
    .with_unwind_slippage_bps(cfg.watchdog.flatten_slippage_bps);
    session.start(chrono::Utc::now()).await?;

    session
        .run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            },
        )
        .await
}

// Logs go to stderr; stdout carries the reply lines.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
