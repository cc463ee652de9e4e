use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tg_audit::NewAuditEvent;
use tg_schemas::{Action, FillReport, NewTradeRecord, ReasonCode, TradeOutcome, TradeRecord};

use crate::audit::append_in_tx;
use crate::{begin_immediate, finish, parse_ts, ts_text};

const TRADE_COLUMNS: &str = "seq, trade_id, outcome, reason_code, reason, order_json, \
                             broker_order_ids, needs_review, recorded_at";

/// Append one trade record (and its audit event, when given) atomically.
pub async fn append_trade_record(
    pool: &SqlitePool,
    rec: &NewTradeRecord,
    audit: Option<NewAuditEvent>,
) -> Result<TradeRecord> {
    if rec.outcome == TradeOutcome::Rejected && rec.reason_code.is_none() {
        return Err(anyhow!(
            "REJECTED trade record for {} has no reason code",
            rec.trade_id
        ));
    }

    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    begin_immediate(&mut conn).await?;
    let res = append_in_tx_with_audit(&mut conn, rec, audit).await;
    finish(&mut conn, res).await
}

async fn append_in_tx_with_audit(
    conn: &mut SqliteConnection,
    rec: &NewTradeRecord,
    audit: Option<NewAuditEvent>,
) -> Result<TradeRecord> {
    let stored = insert_trade_record(conn, rec).await?;
    if let Some(ev) = audit {
        append_in_tx(conn, ev).await?;
    }
    Ok(stored)
}

async fn insert_trade_record(
    conn: &mut SqliteConnection,
    rec: &NewTradeRecord,
) -> Result<TradeRecord> {
    let order_json = rec.order.canonical_json().context("serialize order failed")?;
    let broker_ids =
        serde_json::to_string(&rec.broker_order_ids).context("serialize broker ids failed")?;

    // RETURNING rows are read to the end so the statement completes before
    // the enclosing transaction commits.
    let rows = sqlx::query(&format!(
        r#"
        INSERT INTO trade_records (
          trade_id, outcome, reason_code, reason, order_json, broker_order_ids,
          needs_review, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {TRADE_COLUMNS}
        "#
    ))
    .bind(&rec.trade_id)
    .bind(rec.outcome.as_str())
    .bind(rec.reason_code.map(|c| c.as_str()))
    .bind(rec.reason.as_deref())
    .bind(order_json)
    .bind(broker_ids)
    .bind(i64::from(rec.needs_review))
    .bind(ts_text(&rec.recorded_at))
    .fetch_all(&mut *conn)
    .await
    .with_context(|| {
        format!(
            "insert trade_record failed trade_id={} outcome={}",
            rec.trade_id,
            rec.outcome.as_str()
        )
    })?;

    let row = rows.first().context("insert trade_record returned no row")?;
    trade_from_row(row)
}

/// Every record for `trade_id`, oldest first.
pub async fn trade_records(pool: &SqlitePool, trade_id: &str) -> Result<Vec<TradeRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {TRADE_COLUMNS} FROM trade_records WHERE trade_id = ? ORDER BY seq ASC"
    ))
    .bind(trade_id)
    .fetch_all(pool)
    .await
    .context("trade_records query failed")?;

    rows.iter().map(trade_from_row).collect()
}

pub async fn latest_trade_record(pool: &SqlitePool, trade_id: &str) -> Result<Option<TradeRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {TRADE_COLUMNS} FROM trade_records WHERE trade_id = ? ORDER BY seq DESC LIMIT 1"
    ))
    .bind(trade_id)
    .fetch_optional(pool)
    .await
    .context("latest_trade_record query failed")?;

    row.as_ref().map(trade_from_row).transpose()
}

/// Trades with a PARTIAL_FAILURE record awaiting a human.
pub async fn needs_review_count(pool: &SqlitePool) -> Result<i64> {
    let (n,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT trade_id) FROM trade_records WHERE needs_review = 1")
            .fetch_one(pool)
            .await
            .context("needs_review_count failed")?;
    Ok(n)
}

/// Record a broker fill once. When the fill id is new, `filled` (the FILLED
/// trade record) and `audit` commit with it; a replayed fill returns `None`
/// and writes nothing.
pub async fn insert_fill_once(
    pool: &SqlitePool,
    fill: &FillReport,
    recorded_at: DateTime<Utc>,
    filled: &NewTradeRecord,
    audit: NewAuditEvent,
) -> Result<Option<TradeRecord>> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    begin_immediate(&mut conn).await?;
    let res = fill_in_tx(&mut conn, fill, recorded_at, filled, audit).await;
    finish(&mut conn, res).await
}

async fn fill_in_tx(
    conn: &mut SqliteConnection,
    fill: &FillReport,
    recorded_at: DateTime<Utc>,
    filled: &NewTradeRecord,
    audit: NewAuditEvent,
) -> Result<Option<TradeRecord>> {
    let r = sqlx::query(
        r#"
        INSERT INTO fills (
          fill_id, trade_id, broker_order_id, contract_symbol, action, quantity,
          price_micros, filled_at, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (fill_id) DO NOTHING
        "#,
    )
    .bind(&fill.fill_id)
    .bind(&fill.trade_id)
    .bind(&fill.broker_order_id)
    .bind(&fill.contract_symbol)
    .bind(fill.action.as_str())
    .bind(fill.quantity)
    .bind(fill.price_micros)
    .bind(ts_text(&fill.filled_at))
    .bind(ts_text(&recorded_at))
    .execute(&mut *conn)
    .await
    .with_context(|| format!("insert fill failed fill_id={}", fill.fill_id))?;

    if r.rows_affected() == 0 {
        return Ok(None);
    }
    let stored = append_in_tx_with_audit(conn, filled, Some(audit)).await?;
    Ok(Some(stored))
}

/// Fills recorded for `trade_id`, in arrival order.
pub async fn fills_for_trade(pool: &SqlitePool, trade_id: &str) -> Result<Vec<FillReport>> {
    let rows = sqlx::query(
        r#"
        SELECT fill_id, trade_id, broker_order_id, contract_symbol, action, quantity,
               price_micros, filled_at
        FROM fills WHERE trade_id = ? ORDER BY recorded_at ASC, fill_id ASC
        "#,
    )
    .bind(trade_id)
    .fetch_all(pool)
    .await
    .context("fills_for_trade query failed")?;

    rows.iter()
        .map(|row| -> Result<FillReport> {
            let action: String = row.try_get("action")?;
            let filled_at: String = row.try_get("filled_at")?;
            Ok(FillReport {
                fill_id: row.try_get("fill_id")?,
                trade_id: row.try_get("trade_id")?,
                broker_order_id: row.try_get("broker_order_id")?,
                contract_symbol: row.try_get("contract_symbol")?,
                action: match action.as_str() {
                    "BUY" => Action::Buy,
                    "SELL" => Action::Sell,
                    other => return Err(anyhow!("invalid stored action: {other}")),
                },
                quantity: row.try_get("quantity")?,
                price_micros: row.try_get("price_micros")?,
                filled_at: parse_ts(&filled_at)?,
            })
        })
        .collect()
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord> {
    let outcome_s: String = row.try_get("outcome")?;
    let reason_code_s: Option<String> = row.try_get("reason_code")?;
    let order_json: String = row.try_get("order_json")?;
    let broker_ids: String = row.try_get("broker_order_ids")?;
    let recorded_at: String = row.try_get("recorded_at")?;

    let reason_code = match reason_code_s {
        Some(s) => Some(
            ReasonCode::parse(&s).ok_or_else(|| anyhow!("unknown stored reason_code: {s}"))?,
        ),
        None => None,
    };

    Ok(TradeRecord {
        seq: row.try_get("seq")?,
        trade_id: row.try_get("trade_id")?,
        outcome: TradeOutcome::parse(&outcome_s)
            .ok_or_else(|| anyhow!("unknown stored outcome: {outcome_s}"))?,
        reason_code,
        reason: row.try_get("reason")?,
        order: serde_json::from_str(&order_json).context("invalid stored order_json")?,
        broker_order_ids: serde_json::from_str(&broker_ids)
            .context("invalid stored broker_order_ids")?,
        needs_review: row.try_get::<i64, _>("needs_review")? != 0,
        recorded_at: parse_ts(&recorded_at)?,
    })
}
