//! Risk-state commands: `tg status`, breaker reset and emergency stop.
//!
//! These write to the shared store directly. The watchdog and the trading
//! process re-read the row on every cycle/order, so no restart is needed.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::{opt_dt, opt_str};

pub async fn status(pool: &SqlitePool) -> Result<()> {
    let st = tg_db::load_risk_state(pool).await?;
    let hb = tg_db::read_heartbeat(pool).await?;
    let now = Utc::now();

    println!("breaker_state={:?}", st.breaker_state());
    println!("halted={}", st.is_halted());
    println!("circuit_breaker_reason={}", opt_str(&st.circuit_breaker_reason));
    println!("circuit_breaker_at={}", opt_dt(&st.circuit_breaker_at));
    println!("emergency_stop={}", st.emergency_stop);
    println!("emergency_stop_reason={}", opt_str(&st.emergency_stop_reason));
    println!("emergency_stop_at={}", opt_dt(&st.emergency_stop_at));
    println!("daily_realized_loss_micros={}", st.daily_realized_loss_micros);
    println!("consecutive_losses={}", st.consecutive_losses);
    println!(
        "session_day={}",
        st.session_day.map(|d| d.to_string()).unwrap_or_else(|| "null".into())
    );
    println!(
        "session_start_account_value_micros={}",
        st.session_start_account_value_micros
    );
    match hb {
        Some(hb) => {
            println!("heartbeat_pid={}", hb.pid);
            println!("heartbeat_client_id={}", hb.client_id);
            println!("heartbeat_seq={}", hb.seq);
            println!("heartbeat_age_ms={}", hb.age_ms(now));
            if let Some(at) = hb.stopped_at {
                println!("heartbeat_stopped_at={}", at.to_rfc3339());
            }
        }
        None => println!("heartbeat=null"),
    }
    println!("needs_review_trades={}", tg_db::needs_review_count(pool).await?);
    Ok(())
}

fn require_operator(operator: &str) -> Result<&str> {
    let op = operator.trim();
    if op.is_empty() {
        bail!("--operator must not be empty");
    }
    Ok(op)
}

/// Reset the breaker. With `rebase`, the drawdown baseline moves to the
/// account value the trading process last reported in its heartbeat.
pub async fn reset_circuit_breaker(pool: &SqlitePool, operator: &str, rebase: bool) -> Result<()> {
    let operator = require_operator(operator)?;
    let rebase_value = if rebase {
        let value = tg_db::read_heartbeat(pool)
            .await?
            .and_then(|hb| hb.account_value_micros);
        if value.is_none() {
            eprintln!("warning: no account value in heartbeat; baseline not rebased");
        }
        value
    } else {
        None
    };

    let changed = tg_db::reset_circuit_breaker(pool, operator, Utc::now(), rebase_value).await?;
    println!("reset={changed} operator={operator}");
    if let Some(v) = rebase_value.filter(|_| changed) {
        println!("session_start_account_value_micros={v}");
    }
    if !changed {
        println!("note=circuit breaker was not triggered");
    }
    Ok(())
}

pub async fn emergency_stop(pool: &SqlitePool, operator: &str, reason: &str) -> Result<()> {
    let operator = require_operator(operator)?;
    if reason.trim().is_empty() {
        bail!("--reason must not be empty");
    }
    let changed = tg_db::set_emergency_stop(
        pool,
        Utc::now(),
        reason.trim(),
        &format!("operator:{operator}"),
    )
    .await?;
    println!("emergency_stop_set={changed} operator={operator}");
    Ok(())
}

pub async fn clear_emergency_stop(pool: &SqlitePool, operator: &str) -> Result<()> {
    let operator = require_operator(operator)?;
    let changed = tg_db::clear_emergency_stop(pool, operator, Utc::now()).await?;
    println!("emergency_stop_cleared={changed} operator={operator}");
    Ok(())
}
