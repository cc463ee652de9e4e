//! tg-db
//!
//! Durable store shared by the trading process, the watchdog and the
//! operator tools: risk state, heartbeat, trade records, fills and the audit
//! log, all in one SQLite file.
//!
//! Every write is a targeted statement committed with `synchronous=FULL`
//! before the call returns. Read-modify-write paths (audit chain, realized
//! P&L) run under `BEGIN IMMEDIATE` so two processes never interleave them.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::SqlitePool;

mod audit;
mod heartbeat;
mod risk;
mod trades;

pub use audit::{
    all_audit_events, append_audit_event, audit_event_count, query_audit_events,
    verify_audit_chain, AuditQuery,
};
pub use heartbeat::{
    mark_heartbeat_stopped, process_start_ticks, read_heartbeat, write_heartbeat,
};
pub use risk::{
    begin_session, clear_emergency_stop, load_risk_state, record_realized_pnl,
    reset_circuit_breaker, set_emergency_stop, trigger_circuit_breaker,
};
pub use trades::{
    append_trade_record, fills_for_trade, insert_fill_once, latest_trade_record,
    needs_review_count, trade_records,
};

/// How long a writer waits on the other process's lock before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if missing) the store at `path` and apply migrations.
pub async fn open(path: impl AsRef<Path>) -> Result<SqlitePool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create_dir_all {:?}", parent))?;
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(opts)
        .await
        .with_context(|| format!("failed to open sqlite store {:?}", path))?;

    migrate(&pool).await?;
    tracing::debug!(path = %path.display(), "store opened");
    Ok(pool)
}

/// Run embedded migrations. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Take the write lock up front so read-then-write paths wait on the busy
/// timeout instead of failing with SQLITE_BUSY_SNAPSHOT.
async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .context("begin immediate failed")?;
    Ok(())
}

/// Commit on `Ok`, roll back on `Err`. The original error wins over a
/// rollback failure.
async fn finish<T>(conn: &mut SqliteConnection, res: Result<T>) -> Result<T> {
    match res {
        Ok(v) => {
            if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(anyhow!(e).context("commit failed"));
            }
            Ok(v)
        }
        Err(e) => {
            if let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Text codecs
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 (microseconds, `Z`). Lexical order = time order.
pub(crate) fn ts_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {s}"))
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

pub(crate) fn day_text(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid stored day: {s}"))
}
