use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::usd;

/// Immutable policy constants. Loaded once from config at process start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Reject when `order.max_risk_micros` exceeds this.
    pub max_trade_risk_micros: i64,

    /// Reject when `order.capital_required_micros` exceeds this.
    pub max_trade_capital_micros: i64,

    /// Reject when realized daily loss plus the order's worst case exceeds this.
    pub daily_loss_limit_micros: i64,

    /// Max fraction of account value exposed to one symbol after the trade.
    pub max_concentration_fraction: f64,

    /// Drawdown from session start that trips the circuit breaker (0.10 = 10%).
    pub drawdown_circuit_breaker_fraction: f64,

    /// Reject once this many losing trades have closed in a row.
    pub consecutive_loss_limit: u32,

    /// Minimum strike distance between offsetting legs of a spread.
    pub min_spread_width_micros: i64,

    /// Max legs in one order.
    pub max_legs: usize,
}

impl SafetyLimits {
    /// Conservative defaults for a small options account.
    pub fn conservative_defaults() -> Self {
        Self {
            max_trade_risk_micros: usd(500),
            max_trade_capital_micros: usd(5_000),
            daily_loss_limit_micros: usd(1_000),
            max_concentration_fraction: 0.30,
            drawdown_circuit_breaker_fraction: 0.10,
            consecutive_loss_limit: 5,
            min_spread_width_micros: usd(1),
            max_legs: 4,
        }
    }
}

/// Circuit breaker state machine: `Normal -> Triggered -> Normal`.
/// The way back to `Normal` is an explicit operator reset only.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Normal,
    Triggered,
}

/// Mutable risk counters and flags, persisted in the shared store.
///
/// Field ownership across processes:
/// - trading process: `daily_realized_loss_micros`, `consecutive_losses`
/// - watchdog: `emergency_stop*`, `circuit_breaker*`
/// - either (compare-and-set on `session_day`): session start fields
///
/// Both processes read every field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_realized_loss_micros: i64,
    pub consecutive_losses: u32,

    pub emergency_stop: bool,
    pub emergency_stop_reason: Option<String>,
    pub emergency_stop_at: Option<DateTime<Utc>>,

    pub circuit_breaker_triggered: bool,
    pub circuit_breaker_reason: Option<String>,
    pub circuit_breaker_at: Option<DateTime<Utc>>,

    pub session_start_account_value_micros: i64,
    pub session_day: Option<NaiveDate>,

    pub updated_at: DateTime<Utc>,
}

impl RiskState {
    /// Fresh state for a session starting with `account_value_micros`.
    pub fn new(session_day: NaiveDate, account_value_micros: i64, now: DateTime<Utc>) -> Self {
        Self {
            session_start_account_value_micros: account_value_micros,
            session_day: Some(session_day),
            updated_at: now,
            ..Self::default()
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        if self.circuit_breaker_triggered {
            BreakerState::Triggered
        } else {
            BreakerState::Normal
        }
    }

    /// True when either sticky halt flag is set.
    pub fn is_halted(&self) -> bool {
        self.emergency_stop || self.circuit_breaker_triggered
    }
}
