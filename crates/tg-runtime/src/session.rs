//! The trading process loop.
//!
//! Orders, fills and closes are handled one at a time on the same task that
//! writes the heartbeat, so a submission stuck on the broker also stops the
//! heartbeat and the watchdog sees the freeze.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tg_execution::{
    call_with_retry, with_timeout, Alerter, BrokerAdapter, ExecutionGate, RetryPolicy,
};
use tg_schemas::{HeartbeatRecord, SafetyLimits};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;

use crate::input::{parse_line, TraderInput, TraderOutput};

pub struct TradingSession {
    pool: SqlitePool,
    broker: Arc<dyn BrokerAdapter>,
    gate: ExecutionGate,
    retry: RetryPolicy,
    heartbeat_interval: Duration,
    pid: u32,
}

impl TradingSession {
    pub fn new(
        pool: SqlitePool,
        broker: Arc<dyn BrokerAdapter>,
        alerter: Arc<dyn Alerter>,
        limits: SafetyLimits,
        retry: RetryPolicy,
        heartbeat_interval: Duration,
    ) -> Self {
        let gate = ExecutionGate::new(
            pool.clone(),
            Arc::clone(&broker),
            alerter,
            limits,
            retry,
        );
        Self {
            pool,
            broker,
            gate,
            retry,
            heartbeat_interval,
            pid: std::process::id(),
        }
    }

    /// Slippage for compensating closes after a partial multi-leg failure.
    pub fn with_unwind_slippage_bps(mut self, bps: u32) -> Self {
        self.gate = self.gate.with_unwind_slippage_bps(bps);
        self
    }

    /// Pid written into heartbeats. Defaults to this process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// Open the trading day (first process to see a new day sets the
    /// drawdown baseline) and write the first heartbeat.
    pub async fn start(&self, now: DateTime<Utc>) -> Result<HeartbeatRecord> {
        let account = call_with_retry(&self.retry, "account", || self.broker.account()).await?;
        let state = tg_db::load_risk_state(&self.pool).await?;
        if state.session_day.map_or(true, |d| d < now.date_naive()) {
            let started = tg_db::begin_session(
                &self.pool,
                now.date_naive(),
                account.account_value_micros,
                now,
                self.gate.client_id(),
            )
            .await?;
            tracing::info!(
                started,
                day = %now.date_naive(),
                account_value_micros = account.account_value_micros,
                "trading session opened"
            );
        }
        self.heartbeat(now).await
    }

    /// Write one heartbeat. The account value is a single short attempt; a
    /// slow broker leaves it empty rather than delaying the beat.
    pub async fn heartbeat(&self, now: DateTime<Utc>) -> Result<HeartbeatRecord> {
        let account = with_timeout(self.retry.timeout, self.broker.account())
            .await
            .ok()
            .map(|a| a.account_value_micros);
        let hb =
            tg_db::write_heartbeat(&self.pool, now, self.pid, self.gate.client_id(), account)
                .await?;
        tracing::trace!(seq = hb.seq, "heartbeat");
        Ok(hb)
    }

    /// Handle one input, then pick up any new broker fills.
    pub async fn handle(&self, input: TraderInput) -> Result<TraderOutput> {
        let out = match input {
            TraderInput::Order(order) => TraderOutput::Submit(self.gate.submit(&order).await?),
            TraderInput::Fill { fill } => TraderOutput::Fill {
                recorded: self.gate.record_fill(&fill).await?,
                fill_id: fill.fill_id,
            },
            TraderInput::Close { close } => {
                let risk_state = self
                    .gate
                    .record_close(&close.trade_id, close.realized_pnl_micros)
                    .await?;
                TraderOutput::Close {
                    trade_id: close.trade_id,
                    applied: risk_state.is_some(),
                    risk_state,
                }
            }
        };
        self.sync_fills().await?;
        Ok(out)
    }

    /// Record fills the broker reports for this connection. Already-recorded
    /// fill ids are skipped by the store; returns how many were new.
    pub async fn sync_fills(&self) -> Result<usize> {
        let fills = match with_timeout(self.retry.timeout, self.broker.fills()).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "fill poll failed; will retry after next input");
                return Ok(0);
            }
        };
        let mut new = 0;
        for fill in &fills {
            match self.gate.record_fill(fill).await {
                Ok(true) => new += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(fill_id = %fill.fill_id, error = %format!("{e:#}"), "fill not recorded")
                }
            }
        }
        Ok(new)
    }

    /// Serve JSON lines from `reader` until EOF or `shutdown`, writing one
    /// reply line per input to `writer` and a heartbeat every interval.
    /// A clean exit marks the heartbeat stopped; an error return leaves it
    /// to go stale.
    pub async fn run<R, W>(
        &self,
        reader: R,
        mut writer: W,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut tick = tokio::time::interval(self.heartbeat_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            client_id = %self.gate.client_id(),
            pid = self.pid,
            heartbeat_ms = self.heartbeat_interval.as_millis() as u64,
            "trading loop started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => {
                    if let Err(e) = self.heartbeat(Utc::now()).await {
                        tracing::error!(error = %format!("{e:#}"), "heartbeat write failed");
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let out = match parse_line(&line) {
                        Ok(None) => continue,
                        Ok(Some(input)) => self.handle(input).await.unwrap_or_else(|e| {
                            tracing::error!(error = %format!("{e:#}"), "input failed");
                            TraderOutput::Error { message: format!("{e:#}") }
                        }),
                        Err(e) => {
                            tracing::warn!(error = %format!("{e:#}"), "unparseable input line");
                            TraderOutput::Error { message: format!("{e:#}") }
                        }
                    };
                    let mut body = serde_json::to_string(&out)?;
                    body.push('\n');
                    writer.write_all(body.as_bytes()).await?;
                    writer.flush().await?;
                }
            }
        }
        self.stop(Utc::now()).await?;
        tracing::info!("trading loop stopped");
        Ok(())
    }

    /// Mark the last heartbeat as a clean shutdown so the watchdog does not
    /// treat the silence that follows as a hung process.
    pub async fn stop(&self, now: DateTime<Utc>) -> Result<bool> {
        let marked = tg_db::mark_heartbeat_stopped(&self.pool, self.pid, now).await?;
        tracing::info!(pid = self.pid, marked, "heartbeat marked stopped");
        Ok(marked)
    }
}
