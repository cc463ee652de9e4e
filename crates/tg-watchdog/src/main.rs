//! tg-watchdog entry point.
//!
//! Loads config, opens the shared store and its own broker connection,
//! spawns the poll loop and serves the operator routes until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tg_broker_paper::{PaperVenue, DEFAULT_PAPER_ACCOUNT_VALUE_MICROS};
use tg_execution::{alerter_for, BrokerAdapter, RetryPolicy};
use tg_watchdog::routes::{self, AppState};
use tg_watchdog::{SigkillTerminator, Watchdog, WatchdogSettings};
use tokio::sync::watch;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

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
    let broker: Arc<dyn BrokerAdapter> = Arc::new(venue.connect(cfg.watchdog.client_id.clone()));
    let alerter = alerter_for(
        secrets.alert_webhook_url.as_deref(),
        cfg.broker.request_timeout(),
    )?;

    let watchdog = Arc::new(Watchdog::new(
        pool,
        broker,
        Arc::new(SigkillTerminator),
        alerter,
        limits,
        RetryPolicy::from_config(&cfg.broker),
        WatchdogSettings::from_config(&cfg),
    ));

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(Arc::clone(&watchdog).run(async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    }));

    let app = routes::build_router(Arc::new(AppState { watchdog }))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = cfg.watchdog.listen_addr()?;
    info!("tg-watchdog listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("server crashed")?;

    let _ = stop_tx.send(true);
    loop_handle.await.context("watchdog loop panicked")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
