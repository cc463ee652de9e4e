//! The watchdog poll cycle.
//!
//! Runs in its own OS process with its own broker connection. Each cycle:
//! heartbeat freshness, account value and drawdown, then the safety actions
//! those imply. Cycles never overlap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tg_audit::{AuditEventType, NewAuditEvent};
use tg_config::GuardConfig;
use tg_execution::{
    call_with_retry, raise, Alert, Alerter, BrokerAdapter, BrokerError, RetryPolicy,
};
use tg_risk::{evaluate_drawdown, DrawdownCheck};
use tg_schemas::{usd, HeartbeatRecord, RiskState, SafetyLimits};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use crate::flatten::{emergency_flatten, FlattenReport};
use crate::terminate::{ProcessTerminator, TerminateOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub client_id: String,
    pub poll_interval: Duration,
    pub stale_threshold: Duration,
    pub flatten_slippage_bps: u32,
}

impl WatchdogSettings {
    pub fn from_config(cfg: &GuardConfig) -> Self {
        Self {
            client_id: cfg.watchdog.client_id.clone(),
            poll_interval: cfg.watchdog.poll_interval(),
            stale_threshold: Duration::from_millis(cfg.watchdog.stale_threshold_ms),
            flatten_slippage_bps: cfg.watchdog.flatten_slippage_bps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatStatus {
    /// The trading process has never written a heartbeat.
    Missing,
    /// The last beat was followed by a clean shutdown. Not a failure.
    Stopped { pid: u32, seq: i64 },
    Fresh { age_ms: i64, pid: u32, seq: i64 },
    Stale { age_ms: i64, pid: u32, seq: i64 },
}

impl HeartbeatStatus {
    pub fn classify(hb: Option<&HeartbeatRecord>, now: DateTime<Utc>, stale: Duration) -> Self {
        let Some(hb) = hb else {
            return HeartbeatStatus::Missing;
        };
        if hb.stopped_at.is_some() {
            return HeartbeatStatus::Stopped {
                pid: hb.pid,
                seq: hb.seq,
            };
        }
        let age_ms = hb.age_ms(now);
        if age_ms > i64::try_from(stale.as_millis()).unwrap_or(i64::MAX) {
            HeartbeatStatus::Stale {
                age_ms,
                pid: hb.pid,
                seq: hb.seq,
            }
        } else {
            HeartbeatStatus::Fresh {
                age_ms,
                pid: hb.pid,
                seq: hb.seq,
            }
        }
    }
}

/// What one poll saw and did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReport {
    pub at: DateTime<Utc>,
    pub heartbeat: HeartbeatStatus,
    pub account_value_micros: Option<i64>,
    pub broker_error: Option<String>,
    pub drawdown: Option<DrawdownCheck>,
    pub session_started: bool,
    pub terminated: Option<TerminateOutcome>,
    pub emergency_stop_set: bool,
    pub breaker_triggered: bool,
    pub flatten: Option<FlattenReport>,
    pub flatten_pending: bool,
}

/// Owned by the poll cycle. Held for the whole cycle, which keeps cycles
/// from overlapping.
#[derive(Debug, Default)]
struct CycleMemory {
    /// Failed passes of the pending flatten; the first one alerts.
    flatten_failures: u32,
    /// Heartbeat seq already acted on; a stale beat is handled once.
    handled_stale_seq: Option<i64>,
    broker_down: bool,
}

/// Read and written by the HTTP surface too. Only ever locked for a field
/// access, never across an await on the broker or the store.
#[derive(Debug, Default)]
struct Shared {
    /// Reason of a flatten that has not completed yet.
    flatten_pending: Option<String>,
    last_poll: Option<PollReport>,
}

pub struct Watchdog {
    pool: SqlitePool,
    broker: Arc<dyn BrokerAdapter>,
    terminator: Arc<dyn ProcessTerminator>,
    alerter: Arc<dyn Alerter>,
    limits: SafetyLimits,
    retry: RetryPolicy,
    settings: WatchdogSettings,
    cycle: Mutex<CycleMemory>,
    shared: Mutex<Shared>,
}

impl Watchdog {
    pub fn new(
        pool: SqlitePool,
        broker: Arc<dyn BrokerAdapter>,
        terminator: Arc<dyn ProcessTerminator>,
        alerter: Arc<dyn Alerter>,
        limits: SafetyLimits,
        retry: RetryPolicy,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            pool,
            broker,
            terminator,
            alerter,
            limits,
            retry,
            settings,
            cycle: Mutex::new(CycleMemory::default()),
            shared: Mutex::new(Shared::default()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &WatchdogSettings {
        &self.settings
    }

    pub async fn flatten_pending(&self) -> Option<String> {
        self.shared.lock().await.flatten_pending.clone()
    }

    pub async fn last_poll(&self) -> Option<PollReport> {
        self.shared.lock().await.last_poll.clone()
    }

    /// Queue a flatten for the next cycle (operator emergency stop). Does not
    /// wait for a cycle in progress.
    pub async fn request_flatten(&self, reason: impl Into<String>) {
        let mut shared = self.shared.lock().await;
        if shared.flatten_pending.is_none() {
            shared.flatten_pending = Some(reason.into());
        }
    }

    /// Current account value through the watchdog's own connection.
    pub async fn account_value(&self) -> Result<i64, BrokerError> {
        call_with_retry(&self.retry, "account", || self.broker.account())
            .await
            .map(|a| a.account_value_micros)
    }

    /// Fixed-period loop until `shutdown` resolves. A slow cycle delays the
    /// next tick instead of bunching them.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut tick = tokio::time::interval(self.settings.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            client_id = %self.settings.client_id,
            poll_ms = self.settings.poll_interval.as_millis() as u64,
            stale_ms = self.settings.stale_threshold.as_millis() as u64,
            "watchdog loop started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        tracing::error!(error = %format!("{e:#}"), "watchdog poll failed");
                    }
                }
            }
        }
        tracing::info!("watchdog loop stopped");
    }

    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport> {
        let mut mem = self.cycle.lock().await;

        let hb = tg_db::read_heartbeat(&self.pool).await?;
        let heartbeat = HeartbeatStatus::classify(hb.as_ref(), now, self.settings.stale_threshold);

        // Account value is fetched every cycle, independent of the heartbeat.
        let account = self.account_value().await;
        let broker_error = account.as_ref().err().map(|e| e.to_string());
        self.track_broker(&mut mem, now, &account).await?;

        let mut state = tg_db::load_risk_state(&self.pool).await?;
        let mut session_started = false;
        let mut drawdown = None;
        if let Ok(&value) = account.as_ref() {
            if state.session_day.map_or(true, |d| d < now.date_naive()) {
                session_started = tg_db::begin_session(
                    &self.pool,
                    now.date_naive(),
                    value,
                    now,
                    &self.settings.client_id,
                )
                .await?;
                state = tg_db::load_risk_state(&self.pool).await?;
            }
            drawdown = Some(evaluate_drawdown(&state, value, &self.limits));
        }

        let mut report = PollReport {
            at: now,
            heartbeat: heartbeat.clone(),
            account_value_micros: account.as_ref().ok().copied(),
            broker_error,
            drawdown: drawdown.clone(),
            session_started,
            terminated: None,
            emergency_stop_set: false,
            breaker_triggered: false,
            flatten: None,
            flatten_pending: false,
        };

        if let HeartbeatStatus::Stale { age_ms, pid, seq } = heartbeat {
            if mem.handled_stale_seq != Some(seq) {
                mem.handled_stale_seq = Some(seq);
                let start_ticks = hb.as_ref().and_then(|h| h.process_start_ticks);
                self.on_stale(&mut report, now, age_ms, pid, start_ticks).await?;
            }
        }

        if let Some(dd) = drawdown.filter(|d| d.breached) {
            self.on_drawdown(&mut report, now, &state, &dd).await?;
        }

        if let Some(reason) = self.flatten_pending().await {
            let broker_up = account.is_ok();
            self.flatten(&mut mem, &mut report, now, &reason, broker_up).await?;
        }
        report.flatten_pending = self.flatten_pending().await.is_some();

        tracing::debug!(
            heartbeat = ?report.heartbeat,
            account_value_micros = ?report.account_value_micros,
            flatten_pending = report.flatten_pending,
            "watchdog poll"
        );
        self.shared.lock().await.last_poll = Some(report.clone());
        Ok(report)
    }

    async fn track_broker(
        &self,
        mem: &mut CycleMemory,
        now: DateTime<Utc>,
        account: &Result<i64, BrokerError>,
    ) -> Result<()> {
        match account {
            Err(e) if !mem.broker_down => {
                mem.broker_down = true;
                tracing::warn!(error = %e, "watchdog broker unavailable");
                self.audit(now, AuditEventType::BrokerUnavailable, json!({
                    "stage": "watchdog_account",
                    "error": e.to_string(),
                }))
                .await?;
                raise(
                    self.alerter.as_ref(),
                    Alert::warning(
                        now,
                        "BROKER_UNAVAILABLE",
                        &self.settings.client_id,
                        format!("watchdog cannot read account value: {e}"),
                    ),
                )
                .await;
            }
            Ok(_) if mem.broker_down => {
                mem.broker_down = false;
                tracing::info!("watchdog broker reachable again");
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_stale(
        &self,
        report: &mut PollReport,
        now: DateTime<Utc>,
        age_ms: i64,
        pid: u32,
        start_ticks: Option<i64>,
    ) -> Result<()> {
        let threshold_ms = self.settings.stale_threshold.as_millis() as u64;
        let reason = format!("heartbeat stale: age {age_ms}ms > {threshold_ms}ms (pid {pid})");
        tracing::error!(pid, age_ms, threshold_ms, "trading process heartbeat stale");
        self.audit(now, AuditEventType::HeartbeatStale, json!({
            "age_ms": age_ms,
            "threshold_ms": threshold_ms,
            "pid": pid,
        }))
        .await?;

        match self.terminator.terminate(pid, start_ticks) {
            Ok(outcome) => {
                report.terminated = Some(outcome);
                tracing::error!(pid, outcome = ?outcome, "trading process terminated");
                self.audit(now, AuditEventType::ProcessTerminated, json!({
                    "pid": pid,
                    "signal": "SIGKILL",
                    "outcome": outcome,
                }))
                .await?;
            }
            Err(e) => {
                tracing::error!(pid, error = %format!("{e:#}"), "terminate trading process failed");
                raise(
                    self.alerter.as_ref(),
                    Alert::critical(
                        now,
                        "TERMINATE_FAILED",
                        &self.settings.client_id,
                        format!("could not kill trading process pid {pid}: {e:#}"),
                    ),
                )
                .await;
            }
        }

        report.emergency_stop_set =
            tg_db::set_emergency_stop(&self.pool, now, &reason, &self.settings.client_id).await?;
        self.request_flatten(reason.clone()).await;
        raise(
            self.alerter.as_ref(),
            Alert::critical(now, "HEARTBEAT_STALE", &self.settings.client_id, reason)
                .with_details(json!({ "pid": pid, "age_ms": age_ms })),
        )
        .await;
        Ok(())
    }

    async fn on_drawdown(
        &self,
        report: &mut PollReport,
        now: DateTime<Utc>,
        state: &RiskState,
        dd: &DrawdownCheck,
    ) -> Result<()> {
        let reason = format!(
            "drawdown {:.2}% <= -{:.2}% (start {:.2}, current {:.2})",
            dd.change_fraction * 100.0,
            self.limits.drawdown_circuit_breaker_fraction * 100.0,
            dd.session_start_micros as f64 / usd(1) as f64,
            dd.current_micros as f64 / usd(1) as f64,
        );
        let evidence = json!({
            "session_start_micros": dd.session_start_micros,
            "current_micros": dd.current_micros,
            "change_fraction": dd.change_fraction,
            "threshold_fraction": self.limits.drawdown_circuit_breaker_fraction,
            "session_day": state.session_day,
        });
        let transitioned = tg_db::trigger_circuit_breaker(
            &self.pool,
            now,
            &reason,
            &self.settings.client_id,
            evidence.clone(),
        )
        .await?;
        if !transitioned {
            return Ok(());
        }

        report.breaker_triggered = true;
        tracing::error!(change_fraction = dd.change_fraction, "circuit breaker triggered: {reason}");
        self.request_flatten(reason.clone()).await;
        raise(
            self.alerter.as_ref(),
            Alert::critical(now, "CIRCUIT_BREAKER_TRIGGERED", &self.settings.client_id, reason)
                .with_details(evidence),
        )
        .await;
        Ok(())
    }

    /// Attempt the pending flatten. Stays pending until a pass completes.
    async fn flatten(
        &self,
        mem: &mut CycleMemory,
        report: &mut PollReport,
        now: DateTime<Utc>,
        reason: &str,
        broker_up: bool,
    ) -> Result<()> {
        let first_failure = mem.flatten_failures == 0;

        let result = if broker_up {
            emergency_flatten(
                self.broker.as_ref(),
                &self.retry,
                self.settings.flatten_slippage_bps,
            )
            .await
        } else {
            Err(BrokerError::Unavailable("watchdog broker unavailable this cycle".into()))
        };

        match result {
            Ok(r) if r.is_complete() => {
                self.audit(now, AuditEventType::FlattenSubmitted, json!({
                    "reason": reason,
                    "report": r,
                }))
                .await?;
                self.shared.lock().await.flatten_pending = None;
                mem.flatten_failures = 0;
                report.flatten = Some(r);
            }
            Ok(r) => {
                mem.flatten_failures += 1;
                self.flatten_failed(now, reason, first_failure, json!({ "report": r }))
                    .await?;
                report.flatten = Some(r);
            }
            Err(e) => {
                mem.flatten_failures += 1;
                self.flatten_failed(now, reason, first_failure, json!({ "error": e.to_string() }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn flatten_failed(
        &self,
        now: DateTime<Utc>,
        reason: &str,
        alert: bool,
        details: serde_json::Value,
    ) -> Result<()> {
        tracing::error!(details = %details, "emergency flatten incomplete; will retry next cycle");
        self.audit(now, AuditEventType::FlattenFailed, json!({
            "reason": reason,
            "details": details,
        }))
        .await?;
        if alert {
            raise(
                self.alerter.as_ref(),
                Alert::critical(
                    now,
                    "FLATTEN_FAILED",
                    &self.settings.client_id,
                    "emergency flatten incomplete; retrying every cycle, check positions",
                )
                .with_details(details),
            )
            .await;
        }
        Ok(())
    }

    async fn audit(
        &self,
        now: DateTime<Utc>,
        event_type: AuditEventType,
        payload: serde_json::Value,
    ) -> Result<()> {
        tg_db::append_audit_event(
            &self.pool,
            NewAuditEvent::new(now, event_type, self.settings.client_id.as_str(), payload),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn hb(ts: DateTime<Utc>) -> HeartbeatRecord {
        HeartbeatRecord {
            ts,
            pid: 4242,
            client_id: "tg-trader".into(),
            seq: 9,
            account_value_micros: None,
            process_start_ticks: None,
            stopped_at: None,
        }
    }

    #[test]
    fn heartbeat_classification_uses_strict_threshold() {
        let now = Utc::now();
        let stale = Duration::from_secs(60);
        assert_eq!(HeartbeatStatus::classify(None, now, stale), HeartbeatStatus::Missing);
        assert!(matches!(
            HeartbeatStatus::classify(Some(&hb(now - ChronoDuration::seconds(60))), now, stale),
            HeartbeatStatus::Fresh { .. }
        ));
        assert_eq!(
            HeartbeatStatus::classify(Some(&hb(now - ChronoDuration::seconds(65))), now, stale),
            HeartbeatStatus::Stale {
                age_ms: 65_000,
                pid: 4242,
                seq: 9
            }
        );
    }

    #[test]
    fn stopped_beat_is_never_stale() {
        let now = Utc::now();
        let mut beat = hb(now - ChronoDuration::seconds(3600));
        beat.stopped_at = Some(now - ChronoDuration::seconds(3599));
        assert_eq!(
            HeartbeatStatus::classify(Some(&beat), now, Duration::from_secs(60)),
            HeartbeatStatus::Stopped { pid: 4242, seq: 9 }
        );
    }
}
