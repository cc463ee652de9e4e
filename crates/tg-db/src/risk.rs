use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection};
use sqlx::{Row, Sqlite, SqlitePool};
use tg_audit::{AuditEventType, NewAuditEvent};
use tg_schemas::RiskState;

use crate::audit::append_in_tx;
use crate::{begin_immediate, day_text, finish, parse_day, parse_opt_ts, parse_ts, ts_text};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

pub async fn load_risk_state(pool: &SqlitePool) -> Result<RiskState> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    load_in_tx(&mut conn).await
}

async fn load_in_tx(conn: &mut SqliteConnection) -> Result<RiskState> {
    let row = sqlx::query(
        r#"
        SELECT daily_realized_loss_micros, consecutive_losses,
               emergency_stop, emergency_stop_reason, emergency_stop_at,
               circuit_breaker_triggered, circuit_breaker_reason, circuit_breaker_at,
               session_start_account_value_micros, session_day, updated_at
        FROM risk_state WHERE id = 1
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .context("load_risk_state failed")?;

    let consecutive: i64 = row.try_get("consecutive_losses")?;
    let session_day: Option<String> = row.try_get("session_day")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(RiskState {
        daily_realized_loss_micros: row.try_get("daily_realized_loss_micros")?,
        consecutive_losses: u32::try_from(consecutive)
            .with_context(|| format!("stored consecutive_losses out of range: {consecutive}"))?,
        emergency_stop: row.try_get::<i64, _>("emergency_stop")? != 0,
        emergency_stop_reason: row.try_get("emergency_stop_reason")?,
        emergency_stop_at: parse_opt_ts(row.try_get("emergency_stop_at")?)?,
        circuit_breaker_triggered: row.try_get::<i64, _>("circuit_breaker_triggered")? != 0,
        circuit_breaker_reason: row.try_get("circuit_breaker_reason")?,
        circuit_breaker_at: parse_opt_ts(row.try_get("circuit_breaker_at")?)?,
        session_start_account_value_micros: row.try_get("session_start_account_value_micros")?,
        session_day: session_day.as_deref().map(parse_day).transpose()?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Start trading day `day` with `account_value_micros` as the drawdown
/// baseline. Compare-and-set on `session_day`: only the first caller for a
/// new day wins; returns whether this call started the session.
pub async fn begin_session(
    pool: &SqlitePool,
    day: NaiveDate,
    account_value_micros: i64,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<bool> {
    let day_s = day_text(&day);
    let update = sqlx::query(
        r#"
        UPDATE risk_state
        SET session_day = ?,
            session_start_account_value_micros = ?,
            daily_realized_loss_micros = 0,
            updated_at = ?
        WHERE id = 1 AND (session_day IS NULL OR session_day < ?)
        "#,
    )
    .bind(day_s.clone())
    .bind(account_value_micros)
    .bind(ts_text(&now))
    .bind(day_s.clone());

    let ev = NewAuditEvent::new(
        now,
        AuditEventType::SessionStarted,
        actor,
        json!({
            "session_day": day_s,
            "session_start_account_value_micros": account_value_micros,
        }),
    );
    guarded_transition(pool, update, ev).await
}

// ---------------------------------------------------------------------------
// Fill-driven counters (trading process)
// ---------------------------------------------------------------------------

/// Apply one closed trade's realized P&L to the fill-driven counters, at
/// most once per `trade_id`. Returns the new state, or `None` when this
/// trade was already applied.
pub async fn record_realized_pnl(
    pool: &SqlitePool,
    trade_id: &str,
    pnl_micros: i64,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<Option<RiskState>> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    begin_immediate(&mut conn).await?;
    let res = realized_pnl_in_tx(&mut conn, trade_id, pnl_micros, now, actor).await;
    finish(&mut conn, res).await
}

async fn realized_pnl_in_tx(
    conn: &mut SqliteConnection,
    trade_id: &str,
    pnl_micros: i64,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<Option<RiskState>> {
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO closed_trades (trade_id, realized_pnl_micros, closed_at) VALUES (?, ?, ?)",
    )
    .bind(trade_id)
    .bind(pnl_micros)
    .bind(ts_text(&now))
    .execute(&mut *conn)
    .await
    .context("insert closed_trade failed")?;
    if inserted.rows_affected() == 0 {
        return Ok(None);
    }

    let mut st = load_in_tx(conn).await?;
    tg_risk::apply_realized_pnl(&mut st, pnl_micros, now);

    // Only the fill-driven columns; watchdog-owned flags are untouched.
    sqlx::query(
        r#"
        UPDATE risk_state
        SET daily_realized_loss_micros = ?, consecutive_losses = ?, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(st.daily_realized_loss_micros)
    .bind(i64::from(st.consecutive_losses))
    .bind(ts_text(&now))
    .execute(&mut *conn)
    .await
    .context("record_realized_pnl update failed")?;

    append_in_tx(
        conn,
        NewAuditEvent::new(
            now,
            AuditEventType::TradeClosed,
            actor,
            json!({
                "realized_pnl_micros": pnl_micros,
                "daily_realized_loss_micros": st.daily_realized_loss_micros,
                "consecutive_losses": st.consecutive_losses,
            }),
        )
        .with_trade_id(trade_id),
    )
    .await?;
    Ok(Some(st))
}

// ---------------------------------------------------------------------------
// Circuit breaker / emergency stop (watchdog sets, operator clears)
// ---------------------------------------------------------------------------

/// NORMAL -> TRIGGERED. Returns `false` (and records nothing) when the
/// breaker was already triggered.
pub async fn trigger_circuit_breaker(
    pool: &SqlitePool,
    at: DateTime<Utc>,
    reason: &str,
    actor: &str,
    evidence: serde_json::Value,
) -> Result<bool> {
    let at_s = ts_text(&at);
    let update = sqlx::query(
        r#"
        UPDATE risk_state
        SET circuit_breaker_triggered = 1, circuit_breaker_reason = ?,
            circuit_breaker_at = ?, updated_at = ?
        WHERE id = 1 AND circuit_breaker_triggered = 0
        "#,
    )
    .bind(reason.to_string())
    .bind(at_s.clone())
    .bind(at_s);

    let ev = NewAuditEvent::new(
        at,
        AuditEventType::CircuitBreakerTriggered,
        actor,
        json!({ "reason": reason, "evidence": evidence }),
    );
    guarded_transition(pool, update, ev).await
}

/// TRIGGERED -> NORMAL. Manual only: `operator` is recorded as the actor.
///
/// `rebase_account_value_micros` moves the drawdown baseline to the current
/// account value, so the next watchdog poll does not re-trigger on the loss
/// the operator just acknowledged. `None` keeps the existing baseline.
pub async fn reset_circuit_breaker(
    pool: &SqlitePool,
    operator: &str,
    now: DateTime<Utc>,
    rebase_account_value_micros: Option<i64>,
) -> Result<bool> {
    let update = sqlx::query(
        r#"
        UPDATE risk_state
        SET circuit_breaker_triggered = 0, circuit_breaker_reason = NULL,
            circuit_breaker_at = NULL, updated_at = ?,
            session_start_account_value_micros = COALESCE(?, session_start_account_value_micros)
        WHERE id = 1 AND circuit_breaker_triggered = 1
        "#,
    )
    .bind(ts_text(&now))
    .bind(rebase_account_value_micros);

    let ev = NewAuditEvent::new(
        now,
        AuditEventType::CircuitBreakerReset,
        operator_actor(operator),
        json!({
            "operator": operator,
            "rebase_account_value_micros": rebase_account_value_micros,
        }),
    );
    guarded_transition(pool, update, ev).await
}

pub async fn set_emergency_stop(
    pool: &SqlitePool,
    at: DateTime<Utc>,
    reason: &str,
    actor: &str,
) -> Result<bool> {
    let at_s = ts_text(&at);
    let update = sqlx::query(
        r#"
        UPDATE risk_state
        SET emergency_stop = 1, emergency_stop_reason = ?,
            emergency_stop_at = ?, updated_at = ?
        WHERE id = 1 AND emergency_stop = 0
        "#,
    )
    .bind(reason.to_string())
    .bind(at_s.clone())
    .bind(at_s);

    let ev = NewAuditEvent::new(
        at,
        AuditEventType::EmergencyStopSet,
        actor,
        json!({ "reason": reason }),
    );
    guarded_transition(pool, update, ev).await
}

pub async fn clear_emergency_stop(
    pool: &SqlitePool,
    operator: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let update = sqlx::query(
        r#"
        UPDATE risk_state
        SET emergency_stop = 0, emergency_stop_reason = NULL,
            emergency_stop_at = NULL, updated_at = ?
        WHERE id = 1 AND emergency_stop = 1
        "#,
    )
    .bind(ts_text(&now));

    let ev = NewAuditEvent::new(
        now,
        AuditEventType::EmergencyStopCleared,
        operator_actor(operator),
        json!({ "operator": operator }),
    );
    guarded_transition(pool, update, ev).await
}

fn operator_actor(operator: &str) -> String {
    format!("operator:{operator}")
}

/// Run one guarded UPDATE (its `WHERE` clause carries the from-state) and,
/// when it changed the row, append `ev` in the same transaction. A repeat
/// call is a no-op returning `false`.
async fn guarded_transition(
    pool: &SqlitePool,
    update: SqliteQuery<'_>,
    ev: NewAuditEvent,
) -> Result<bool> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    begin_immediate(&mut conn).await?;
    let res = transition_in_tx(&mut conn, update, ev).await;
    finish(&mut conn, res).await
}

async fn transition_in_tx(
    conn: &mut SqliteConnection,
    update: SqliteQuery<'_>,
    ev: NewAuditEvent,
) -> Result<bool> {
    let event_type = ev.event_type;
    let r = update
        .execute(&mut *conn)
        .await
        .with_context(|| format!("{event_type} update failed"))?;
    if r.rows_affected() == 0 {
        return Ok(false);
    }
    append_in_tx(conn, ev).await?;
    Ok(true)
}
