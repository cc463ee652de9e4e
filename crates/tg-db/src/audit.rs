use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tg_audit::{verify_events, AuditEvent, AuditEventType, NewAuditEvent, VerifyResult};
use uuid::Uuid;

use crate::{begin_immediate, finish, parse_ts, ts_text};

const AUDIT_COLUMNS: &str =
    "seq, event_id, ts_utc, event_type, trade_id, actor, payload, hash_prev, hash_self";

/// Filters for [`query_audit_events`]. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub trade_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    /// Inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Append one event to the chain.
pub async fn append_audit_event(pool: &SqlitePool, ev: NewAuditEvent) -> Result<AuditEvent> {
    let mut conn = pool.acquire().await.context("acquire connection failed")?;
    begin_immediate(&mut conn).await?;
    let res = append_in_tx(&mut conn, ev).await;
    finish(&mut conn, res).await
}

/// Seal and insert inside a caller-owned IMMEDIATE transaction, so the
/// audit row commits atomically with the state change it describes.
pub(crate) async fn append_in_tx(
    conn: &mut SqliteConnection,
    ev: NewAuditEvent,
) -> Result<AuditEvent> {
    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT seq, hash_self FROM audit_events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await
            .context("read audit chain head failed")?;

    let (seq, hash_prev) = match last {
        Some((s, h)) => (s + 1, Some(h)),
        None => (1, None),
    };
    let sealed = ev.seal(seq, hash_prev)?;

    sqlx::query(
        r#"
        INSERT INTO audit_events (
          seq, event_id, ts_utc, event_type, trade_id, actor, payload, hash_prev, hash_self
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sealed.seq)
    .bind(sealed.event_id.to_string())
    .bind(ts_text(&sealed.ts_utc))
    .bind(sealed.event_type.as_str())
    .bind(sealed.trade_id.as_deref())
    .bind(&sealed.actor)
    .bind(tg_audit::canonical_json(&sealed.payload)?)
    .bind(sealed.hash_prev.as_deref())
    .bind(&sealed.hash_self)
    .execute(&mut *conn)
    .await
    .context("insert audit_event failed")?;

    if sealed.event_type.is_safety_trigger() {
        tracing::error!(
            seq = sealed.seq,
            event_type = %sealed.event_type,
            actor = %sealed.actor,
            "safety audit event recorded"
        );
    } else {
        tracing::debug!(seq = sealed.seq, event_type = %sealed.event_type, "audit event recorded");
    }
    Ok(sealed)
}

pub async fn query_audit_events(pool: &SqlitePool, q: &AuditQuery) -> Result<Vec<AuditEvent>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {AUDIT_COLUMNS} FROM audit_events WHERE 1 = 1"));

    if let Some(trade_id) = &q.trade_id {
        qb.push(" AND trade_id = ").push_bind(trade_id.clone());
    }
    if let Some(t) = q.event_type {
        qb.push(" AND event_type = ").push_bind(t.as_str());
    }
    if let Some(since) = &q.since {
        qb.push(" AND ts_utc >= ").push_bind(ts_text(since));
    }
    if let Some(until) = &q.until {
        qb.push(" AND ts_utc < ").push_bind(ts_text(until));
    }
    qb.push(" ORDER BY seq ASC");
    if let Some(limit) = q.limit {
        qb.push(" LIMIT ").push_bind(limit.max(0));
    }

    let rows = qb
        .build()
        .fetch_all(pool)
        .await
        .context("query_audit_events failed")?;
    rows.iter().map(audit_from_row).collect()
}

/// Entire log in chain order.
pub async fn all_audit_events(pool: &SqlitePool) -> Result<Vec<AuditEvent>> {
    query_audit_events(pool, &AuditQuery::default()).await
}

pub async fn audit_event_count(pool: &SqlitePool) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
        .fetch_one(pool)
        .await
        .context("audit_event_count failed")?;
    Ok(n)
}

/// Re-hash the stored chain end to end.
pub async fn verify_audit_chain(pool: &SqlitePool) -> Result<VerifyResult> {
    let events = all_audit_events(pool).await?;
    verify_events(&events)
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEvent> {
    let event_type_s: String = row.try_get("event_type")?;
    let event_id_s: String = row.try_get("event_id")?;
    let ts_s: String = row.try_get("ts_utc")?;
    let payload_s: String = row.try_get("payload")?;

    Ok(AuditEvent {
        seq: row.try_get("seq")?,
        event_id: Uuid::parse_str(&event_id_s)
            .with_context(|| format!("invalid stored event_id: {event_id_s}"))?,
        ts_utc: parse_ts(&ts_s)?,
        event_type: AuditEventType::parse(&event_type_s)
            .ok_or_else(|| anyhow!("unknown stored event_type: {event_type_s}"))?,
        trade_id: row.try_get("trade_id")?,
        actor: row.try_get("actor")?,
        payload: serde_json::from_str(&payload_s).context("invalid stored audit payload")?,
        hash_prev: row.try_get("hash_prev")?,
        hash_self: row.try_get("hash_self")?,
    })
}
