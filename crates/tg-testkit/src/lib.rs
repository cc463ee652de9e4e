//! Shared fixtures for the cross-crate scenario tests.
//!
//! A [`Rig`] is one shared store, one paper venue, and the two independent
//! connections the real deployment has: the trading process's execution
//! gate and the watchdog.

mod fakes;
mod orders;

pub use fakes::{FakeTerminator, RecordingAlerter};
pub use orders::{long_call, put_credit_spread, EXPIRY};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tg_audit::{AuditEvent, AuditEventType};
use tg_broker_paper::PaperVenue;
use tg_db::AuditQuery;
use tg_execution::{BrokerAdapter, ExecutionGate, RetryPolicy};
use tg_schemas::SafetyLimits;
use tg_watchdog::{Watchdog, WatchdogSettings};

pub const TRADER_CLIENT_ID: &str = "tg-trader";
pub const WATCHDOG_CLIENT_ID: &str = "tg-watchdog";

/// Two quick attempts with millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        timeout: Duration::from_millis(500),
    }
}

pub fn watchdog_settings() -> WatchdogSettings {
    WatchdogSettings {
        client_id: WATCHDOG_CLIENT_ID.to_string(),
        poll_interval: Duration::from_secs(10),
        stale_threshold: Duration::from_secs(60),
        flatten_slippage_bps: 50,
    }
}

/// SQLite store in a temp directory that lives as long as this value.
pub struct TempStore {
    pub dir: tempfile::TempDir,
    pub pool: SqlitePool,
}

impl TempStore {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pool = tg_db::open(dir.path().join("tg.sqlite")).await?;
        Ok(Self { dir, pool })
    }
}

pub struct Rig {
    pub store: TempStore,
    pub venue: Arc<PaperVenue>,
    pub gate: ExecutionGate,
    pub watchdog: Watchdog,
    pub trader_alerts: Arc<RecordingAlerter>,
    pub watchdog_alerts: Arc<RecordingAlerter>,
    pub terminator: Arc<FakeTerminator>,
}

impl Rig {
    pub async fn new(account_value_micros: i64) -> Result<Self> {
        Self::with_limits(account_value_micros, SafetyLimits::conservative_defaults()).await
    }

    pub async fn with_limits(account_value_micros: i64, limits: SafetyLimits) -> Result<Self> {
        let store = TempStore::new().await?;
        let venue = PaperVenue::in_memory(account_value_micros);
        let trader_alerts = Arc::new(RecordingAlerter::default());
        let watchdog_alerts = Arc::new(RecordingAlerter::default());
        let terminator = Arc::new(FakeTerminator::default());

        let trader: Arc<dyn BrokerAdapter> = Arc::new(venue.connect(TRADER_CLIENT_ID));
        let gate = ExecutionGate::new(
            store.pool.clone(),
            trader,
            trader_alerts.clone(),
            limits.clone(),
            fast_retry(),
        );
        let watchdog = Watchdog::new(
            store.pool.clone(),
            Arc::new(venue.connect(WATCHDOG_CLIENT_ID)),
            terminator.clone(),
            watchdog_alerts.clone(),
            limits,
            fast_retry(),
            watchdog_settings(),
        );
        Ok(Self {
            store,
            venue,
            gate,
            watchdog,
            trader_alerts,
            watchdog_alerts,
            terminator,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.store.pool
    }

    /// Open today's session with `account_value_micros` as the baseline.
    pub async fn open_session(&self, now: DateTime<Utc>, account_value_micros: i64) -> Result<()> {
        tg_db::begin_session(
            self.pool(),
            now.date_naive(),
            account_value_micros,
            now,
            TRADER_CLIENT_ID,
        )
        .await?;
        Ok(())
    }

    pub async fn events_of(&self, event_type: AuditEventType) -> Result<Vec<AuditEvent>> {
        tg_db::query_audit_events(
            self.pool(),
            &AuditQuery {
                event_type: Some(event_type),
                ..AuditQuery::default()
            },
        )
        .await
    }

    /// Venue orders whose client id starts with `prefix`.
    pub async fn venue_orders_with_prefix(&self, prefix: &str) -> Result<usize> {
        let st = self.venue.snapshot().await?;
        Ok(st
            .orders
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count())
    }
}
