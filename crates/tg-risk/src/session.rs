use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tg_schemas::{RiskState, SafetyLimits};

/// Result of comparing the current account value to the session baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawdownCheck {
    pub session_start_micros: i64,
    pub current_micros: i64,
    /// `(current - start) / start`. Negative when the account is down.
    pub change_fraction: f64,
    pub breached: bool,
    /// No positive session baseline yet; nothing can be concluded.
    pub baseline_missing: bool,
}

/// Breach when `(current - start) / start <= -drawdown_circuit_breaker_fraction`.
pub fn evaluate_drawdown(
    state: &RiskState,
    current_account_value_micros: i64,
    limits: &SafetyLimits,
) -> DrawdownCheck {
    let start = state.session_start_account_value_micros;
    if start <= 0 {
        return DrawdownCheck {
            session_start_micros: start,
            current_micros: current_account_value_micros,
            change_fraction: 0.0,
            breached: false,
            baseline_missing: true,
        };
    }

    let delta = current_account_value_micros as i128 - start as i128;
    let change_fraction = delta as f64 / start as f64;
    DrawdownCheck {
        session_start_micros: start,
        current_micros: current_account_value_micros,
        change_fraction,
        breached: change_fraction <= -limits.drawdown_circuit_breaker_fraction,
        baseline_missing: false,
    }
}

/// Fold one closed trade's realized P&L into the fill-driven counters.
///
/// A loss adds its magnitude to `daily_realized_loss_micros` and extends the
/// losing streak. A flat or winning close breaks the streak; it does not pay
/// back the day's realized loss.
pub fn apply_realized_pnl(state: &mut RiskState, pnl_micros: i64, now: DateTime<Utc>) {
    if pnl_micros < 0 {
        state.daily_realized_loss_micros = state
            .daily_realized_loss_micros
            .saturating_add(pnl_micros.saturating_neg());
        state.consecutive_losses = state.consecutive_losses.saturating_add(1);
    } else {
        state.consecutive_losses = 0;
    }
    state.updated_at = now;
}

/// Start a new trading day. Returns `false` (and leaves `state` alone) when
/// `day` is not after the current session day.
///
/// Daily loss resets and the drawdown baseline moves to `account_value_micros`.
/// Circuit breaker, emergency stop and the losing streak carry over.
pub fn roll_session(
    state: &mut RiskState,
    day: NaiveDate,
    account_value_micros: i64,
    now: DateTime<Utc>,
) -> bool {
    if state.session_day.is_some_and(|current| day <= current) {
        return false;
    }
    state.session_day = Some(day);
    state.session_start_account_value_micros = account_value_micros;
    state.daily_realized_loss_micros = 0;
    state.updated_at = now;
    true
}
