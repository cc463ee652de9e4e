//! `tg audit query|verify|export`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tg_audit::{AuditEventType, VerifyResult};
use tg_db::AuditQuery;

pub struct QueryArgs {
    pub trade_id: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<i64>,
}

fn parse_time(flag: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("{flag} is not an RFC 3339 timestamp: {raw}"))
}

impl QueryArgs {
    fn to_query(&self) -> Result<AuditQuery> {
        let event_type = match self.event_type.as_deref() {
            None => None,
            Some(s) => Some(
                AuditEventType::parse(&s.to_ascii_uppercase())
                    .ok_or_else(|| anyhow!("unknown --event-type: {s}"))?,
            ),
        };
        Ok(AuditQuery {
            trade_id: self.trade_id.clone(),
            event_type,
            since: self.since.as_deref().map(|s| parse_time("--since", s)).transpose()?,
            until: self.until.as_deref().map(|s| parse_time("--until", s)).transpose()?,
            limit: self.limit,
        })
    }
}

/// Print matching events as JSON lines, oldest first.
pub async fn query(pool: &SqlitePool, args: &QueryArgs) -> Result<()> {
    let events = tg_db::query_audit_events(pool, &args.to_query()?).await?;
    for ev in &events {
        println!("{}", serde_json::to_string(ev)?);
    }
    eprintln!("events={}", events.len());
    Ok(())
}

/// Verify the store's chain, or an exported JSONL file when `file` is set.
/// A broken chain is an error so scripts can gate on the exit code.
pub async fn verify(pool: Option<&SqlitePool>, file: Option<&Path>) -> Result<()> {
    let result = match (file, pool) {
        (Some(path), _) => tg_audit::verify_jsonl(path)?,
        (None, Some(pool)) => tg_db::verify_audit_chain(pool).await?,
        (None, None) => return Err(anyhow!("nothing to verify")),
    };
    match result {
        VerifyResult::Valid { events } => {
            println!("audit_chain=VALID events={events}");
            Ok(())
        }
        VerifyResult::Broken { seq, reason } => {
            println!("audit_chain=BROKEN seq={seq} reason={reason}");
            Err(anyhow!("audit chain broken at seq {seq}"))
        }
    }
}

pub async fn export(pool: &SqlitePool, out: &Path) -> Result<()> {
    let events = tg_db::all_audit_events(pool).await?;
    tg_audit::export_jsonl(&events, out)?;
    println!("exported={} path={}", events.len(), out.display());
    Ok(())
}
