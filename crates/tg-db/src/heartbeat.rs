use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tg_schemas::HeartbeatRecord;

use crate::{parse_opt_ts, parse_ts, ts_text};

const HEARTBEAT_COLUMNS: &str =
    "ts, pid, client_id, seq, account_value_micros, process_start_ticks, stopped_at";

/// Overwrite the single heartbeat row. `seq` increments on every write and
/// any stopped marker is cleared. The kernel start time of `pid` is recorded
/// alongside it when the platform exposes one.
pub async fn write_heartbeat(
    pool: &SqlitePool,
    ts: DateTime<Utc>,
    pid: u32,
    client_id: &str,
    account_value_micros: Option<i64>,
) -> Result<HeartbeatRecord> {
    // fetch_all drives the statement to completion, so the row is committed
    // and visible to the watchdog's connection before this returns.
    let rows = sqlx::query(&format!(
        r#"
        INSERT INTO heartbeat (
          id, ts, pid, client_id, seq, account_value_micros, process_start_ticks, stopped_at
        ) VALUES (1, ?, ?, ?, 1, ?, ?, NULL)
        ON CONFLICT (id) DO UPDATE SET
          ts = excluded.ts,
          pid = excluded.pid,
          client_id = excluded.client_id,
          seq = heartbeat.seq + 1,
          account_value_micros = excluded.account_value_micros,
          process_start_ticks = excluded.process_start_ticks,
          stopped_at = NULL
        RETURNING {HEARTBEAT_COLUMNS}
        "#
    ))
    .bind(ts_text(&ts))
    .bind(i64::from(pid))
    .bind(client_id)
    .bind(account_value_micros)
    .bind(process_start_ticks(pid))
    .fetch_all(pool)
    .await
    .context("write_heartbeat failed")?;

    let row = rows.first().context("write_heartbeat returned no row")?;
    heartbeat_from_row(row)
}

/// Mark the beat written by `pid` as a clean shutdown. Returns `false` when
/// the row belongs to another pid or is already marked.
pub async fn mark_heartbeat_stopped(
    pool: &SqlitePool,
    pid: u32,
    at: DateTime<Utc>,
) -> Result<bool> {
    let r = sqlx::query(
        r#"
        UPDATE heartbeat
        SET stopped_at = ?, seq = seq + 1
        WHERE id = 1 AND pid = ? AND stopped_at IS NULL
        "#,
    )
    .bind(ts_text(&at))
    .bind(i64::from(pid))
    .execute(pool)
    .await
    .context("mark_heartbeat_stopped failed")?;
    Ok(r.rows_affected() == 1)
}

/// `None` when the trading process has never written a heartbeat.
pub async fn read_heartbeat(pool: &SqlitePool) -> Result<Option<HeartbeatRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {HEARTBEAT_COLUMNS} FROM heartbeat WHERE id = 1"
    ))
    .fetch_optional(pool)
    .await
    .context("read_heartbeat failed")?;

    row.as_ref().map(heartbeat_from_row).transpose()
}

/// Kernel start time of `pid` in clock ticks since boot. Together with the
/// pid it names one process instance; `None` when the process does not exist
/// or the platform has no procfs.
pub fn process_start_ticks(pid: u32) -> Option<i64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_start_ticks(&stat)
}

/// Field 22 of `/proc/<pid>/stat`. The command name (field 2) may contain
/// spaces and parentheses, so fields are counted from the last `)`.
fn parse_start_ticks(stat: &str) -> Option<i64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace().nth(19)?.parse().ok()
}

fn heartbeat_from_row(row: &SqliteRow) -> Result<HeartbeatRecord> {
    let ts: String = row.try_get("ts")?;
    let pid: i64 = row.try_get("pid")?;
    Ok(HeartbeatRecord {
        ts: parse_ts(&ts)?,
        pid: u32::try_from(pid).with_context(|| format!("stored pid out of range: {pid}"))?,
        client_id: row.try_get("client_id")?,
        seq: row.try_get("seq")?,
        account_value_micros: row.try_get("account_value_micros")?,
        process_start_ticks: row.try_get("process_start_ticks")?,
        stopped_at: parse_opt_ts(row.try_get("stopped_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_ticks_are_counted_past_the_command_name() {
        let stat = "4242 (tg trader) (x) S 1 4242 4242 0 -1 4194560 100 0 0 0 \
                    5 3 0 0 20 0 1 0 987654 1000000 200";
        assert_eq!(parse_start_ticks(stat), Some(987654));
        assert_eq!(parse_start_ticks("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_has_stable_start_ticks() {
        let pid = std::process::id();
        let a = process_start_ticks(pid);
        assert!(a.is_some());
        assert_eq!(a, process_start_ticks(pid));
    }
}
