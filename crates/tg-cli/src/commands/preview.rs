//! `tg preview`: run an order through the validator against live state.
//!
//! Nothing is written: no trade record, no audit event, no broker order.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tg_broker_paper::{PaperVenue, DEFAULT_PAPER_ACCOUNT_VALUE_MICROS};
use tg_config::GuardConfig;
use tg_execution::{ExecutionGate, LogAlerter, RetryPolicy};
use tg_schemas::Order;

pub const PREVIEW_CLIENT_ID: &str = "tg-cli";

pub async fn preview(cfg: &GuardConfig, pool: SqlitePool, order_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(order_path)
        .with_context(|| format!("read order file {}", order_path.display()))?;
    let order: Order = serde_json::from_str(&raw).context("order file is not a valid Order")?;

    let venue = PaperVenue::open(&cfg.broker.venue_path, DEFAULT_PAPER_ACCOUNT_VALUE_MICROS)?;
    let gate = ExecutionGate::new(
        pool,
        Arc::new(venue.connect(PREVIEW_CLIENT_ID)),
        Arc::new(LogAlerter),
        cfg.safety_limits()?,
        RetryPolicy::from_config(&cfg.broker),
    );

    let p = gate.preview(&order).await?;
    println!("{}", serde_json::to_string_pretty(&p)?);
    println!("accepted={}", p.accepted);
    if let Some(r) = &p.rejection {
        println!("reason_code={} reason={}", r.code.as_str(), r.message);
    }
    Ok(())
}
