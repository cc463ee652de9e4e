//! Typed configuration sections.
//!
//! Dollar amounts are written as decimals in YAML and converted to integer
//! micros here. Nothing downstream ever sees an `f64` dollar limit.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tg_schemas::{price_to_micros, SafetyLimits};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    pub max_trade_risk: f64,
    pub max_trade_capital: f64,
    pub daily_loss_limit: f64,
    pub max_concentration_fraction: f64,
    pub drawdown_circuit_breaker_fraction: f64,
    pub consecutive_loss_limit: u32,
    #[serde(default = "default_min_spread_width")]
    pub min_spread_width: f64,
    #[serde(default = "default_max_legs")]
    pub max_legs: usize,
}

fn default_min_spread_width() -> f64 {
    1.0
}

fn default_max_legs() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub db_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Paper venue state file shared by both processes.
    pub venue_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

impl BrokerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingConfig {
    pub client_id: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    pub client_id: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    #[serde(default = "default_flatten_slippage_bps")]
    pub flatten_slippage_bps: u32,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_stale_threshold_ms() -> u64 {
    60_000
}

fn default_flatten_slippage_bps() -> u32 {
    50
}

fn default_listen_addr() -> String {
    "127.0.0.1:8898".to_string()
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid watchdog.listen_addr: {}", self.listen_addr))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    /// NAME of the env var holding the webhook URL. Absent = log-only alerts.
    #[serde(default)]
    pub webhook_url_env: Option<String>,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    pub limits: LimitsConfig,
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub trading: TradingConfig,
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl GuardConfig {
    /// Deserialize from merged config JSON and validate. Fails closed: a
    /// config that does not validate never produces limits.
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: GuardConfig =
            serde_json::from_value(v.clone()).context("CONFIG_INVALID: schema mismatch")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let l = &self.limits;
        for (name, v) in [
            ("limits.max_trade_risk", l.max_trade_risk),
            ("limits.max_trade_capital", l.max_trade_capital),
            ("limits.daily_loss_limit", l.daily_loss_limit),
            ("limits.min_spread_width", l.min_spread_width),
        ] {
            if !(v.is_finite() && v > 0.0) {
                bail!("CONFIG_INVALID: {name} must be positive, got {v}");
            }
        }
        for (name, v) in [
            ("limits.max_concentration_fraction", l.max_concentration_fraction),
            (
                "limits.drawdown_circuit_breaker_fraction",
                l.drawdown_circuit_breaker_fraction,
            ),
        ] {
            if !(v > 0.0 && v < 1.0) {
                bail!("CONFIG_INVALID: {name} must be in (0, 1), got {v}");
            }
        }
        if l.consecutive_loss_limit == 0 {
            bail!("CONFIG_INVALID: limits.consecutive_loss_limit must be positive");
        }
        if l.max_legs == 0 {
            bail!("CONFIG_INVALID: limits.max_legs must be positive");
        }

        if self.store.db_path.trim().is_empty() {
            bail!("CONFIG_INVALID: store.db_path is empty");
        }
        if self.broker.venue_path.trim().is_empty() {
            bail!("CONFIG_INVALID: broker.venue_path is empty");
        }
        if self.broker.request_timeout_ms == 0 {
            bail!("CONFIG_INVALID: broker.request_timeout_ms must be positive");
        }
        if self.broker.retry.max_attempts == 0 {
            bail!("CONFIG_INVALID: broker.retry.max_attempts must be at least 1");
        }
        if self.broker.retry.initial_backoff_ms > self.broker.retry.max_backoff_ms {
            bail!("CONFIG_INVALID: broker.retry.initial_backoff_ms exceeds max_backoff_ms");
        }

        let trader = self.trading.client_id.trim();
        let watchdog = self.watchdog.client_id.trim();
        if trader.is_empty() || watchdog.is_empty() {
            bail!("CONFIG_INVALID: trading.client_id and watchdog.client_id are required");
        }
        if trader == watchdog {
            bail!(
                "CONFIG_INVALID: watchdog.client_id must differ from trading.client_id ({trader})"
            );
        }
        if self.trading.heartbeat_interval_ms == 0 {
            bail!("CONFIG_INVALID: trading.heartbeat_interval_ms must be positive");
        }
        if self.watchdog.poll_interval_ms == 0 {
            bail!("CONFIG_INVALID: watchdog.poll_interval_ms must be positive");
        }
        if self.watchdog.stale_threshold_ms <= self.watchdog.poll_interval_ms {
            bail!(
                "CONFIG_INVALID: watchdog.stale_threshold_ms ({}) must exceed poll_interval_ms ({})",
                self.watchdog.stale_threshold_ms,
                self.watchdog.poll_interval_ms
            );
        }
        if self.watchdog.stale_threshold_ms <= self.trading.heartbeat_interval_ms {
            bail!("CONFIG_INVALID: watchdog.stale_threshold_ms must exceed trading.heartbeat_interval_ms");
        }
        self.watchdog.listen_addr()?;
        Ok(())
    }

    /// Limits in micros for the validator.
    pub fn safety_limits(&self) -> Result<SafetyLimits> {
        let l = &self.limits;
        Ok(SafetyLimits {
            max_trade_risk_micros: dollars(l.max_trade_risk, "limits.max_trade_risk")?,
            max_trade_capital_micros: dollars(l.max_trade_capital, "limits.max_trade_capital")?,
            daily_loss_limit_micros: dollars(l.daily_loss_limit, "limits.daily_loss_limit")?,
            max_concentration_fraction: l.max_concentration_fraction,
            drawdown_circuit_breaker_fraction: l.drawdown_circuit_breaker_fraction,
            consecutive_loss_limit: l.consecutive_loss_limit,
            min_spread_width_micros: dollars(l.min_spread_width, "limits.min_spread_width")?,
            max_legs: l.max_legs,
        })
    }
}

fn dollars(v: f64, field: &str) -> Result<i64> {
    price_to_micros(v).with_context(|| format!("CONFIG_INVALID: {field}"))
}
