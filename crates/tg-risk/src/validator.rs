use serde::{Deserialize, Serialize};
use tg_schemas::{Order, PortfolioView, ReasonCode, Rejection, RiskState, SafetyLimits};

/// Outcome of [`validate`]. A rejection is a normal value, never an `Err`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    Reject(Rejection),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Accept => None,
            Decision::Reject(r) => Some(r),
        }
    }

    fn reject(code: ReasonCode, message: impl Into<String>) -> Self {
        Decision::Reject(Rejection::new(code, message))
    }
}

/// Worst-case loss of an order: the larger of its declared max risk and its
/// net debit. A mis-declared `max_risk` can never understate a debit trade.
pub fn worst_case_loss(order: &Order) -> i128 {
    (order.max_risk_micros as i128).max(order.net_debit_micros())
}

/// Validate one candidate order against the limits.
///
/// Check order is fixed; the first failing check decides the code:
/// 1. EMERGENCY_STOP
/// 2. CIRCUIT_BREAKER_ACTIVE
/// 3. RISK_EXCEEDED
/// 4. CAPITAL_EXCEEDED
/// 5. DAILY_LOSS_LIMIT
/// 6. CONSECUTIVE_LOSS_LIMIT
/// 7. CONCENTRATION_EXCEEDED
/// 8. INVALID_LEG
pub fn validate(
    order: &Order,
    state: &RiskState,
    limits: &SafetyLimits,
    portfolio: &PortfolioView,
) -> Decision {
    // 1) Emergency stop overrides everything.
    if state.emergency_stop {
        let why = state.emergency_stop_reason.as_deref().unwrap_or("unspecified");
        return Decision::reject(
            ReasonCode::EmergencyStop,
            format!("emergency stop set: {why}"),
        );
    }

    // 2) Circuit breaker is sticky until an operator resets it.
    if state.circuit_breaker_triggered {
        let why = state.circuit_breaker_reason.as_deref().unwrap_or("unspecified");
        return Decision::reject(
            ReasonCode::CircuitBreakerActive,
            format!("circuit breaker triggered: {why}"),
        );
    }

    // 3) Per-trade risk.
    if order.max_risk_micros > limits.max_trade_risk_micros {
        return Decision::reject(
            ReasonCode::RiskExceeded,
            format!(
                "max_risk_micros={} > max_trade_risk_micros={}",
                order.max_risk_micros, limits.max_trade_risk_micros
            ),
        );
    }

    // 4) Per-trade capital.
    if order.capital_required_micros > limits.max_trade_capital_micros {
        return Decision::reject(
            ReasonCode::CapitalExceeded,
            format!(
                "capital_required_micros={} > max_trade_capital_micros={}",
                order.capital_required_micros, limits.max_trade_capital_micros
            ),
        );
    }

    // 5) Daily loss headroom. i128 so corrupted counters cannot wrap past the limit.
    let worst = worst_case_loss(order);
    let projected = state.daily_realized_loss_micros as i128 + worst;
    if projected > limits.daily_loss_limit_micros as i128 {
        return Decision::reject(
            ReasonCode::DailyLossLimit,
            format!(
                "daily_realized_loss_micros={} + worst_case_loss_micros={} > daily_loss_limit_micros={}",
                state.daily_realized_loss_micros, worst, limits.daily_loss_limit_micros
            ),
        );
    }

    // 6) Losing streak.
    if state.consecutive_losses >= limits.consecutive_loss_limit {
        return Decision::reject(
            ReasonCode::ConsecutiveLossLimit,
            format!(
                "consecutive_losses={} >= consecutive_loss_limit={}",
                state.consecutive_losses, limits.consecutive_loss_limit
            ),
        );
    }

    // 7) Post-trade concentration. No positive account value = fail closed.
    if portfolio.account_value_micros <= 0 {
        return Decision::reject(
            ReasonCode::ConcentrationExceeded,
            format!(
                "account_value_micros={} is not positive; concentration cannot be evaluated",
                portfolio.account_value_micros
            ),
        );
    }
    let existing = portfolio.exposure(&order.symbol);
    let post_trade = existing as i128 + order.capital_required_micros as i128;
    let fraction = post_trade as f64 / portfolio.account_value_micros as f64;
    if fraction > limits.max_concentration_fraction {
        return Decision::reject(
            ReasonCode::ConcentrationExceeded,
            format!(
                "{} post-trade exposure {:.4} > max_concentration_fraction {:.4}",
                order.symbol, fraction, limits.max_concentration_fraction
            ),
        );
    }

    // 8) Structure.
    if let Some(msg) = leg_violation(order, limits) {
        return Decision::reject(ReasonCode::InvalidLeg, msg);
    }

    Decision::Accept
}

fn leg_violation(order: &Order, limits: &SafetyLimits) -> Option<String> {
    if order.legs.is_empty() {
        return Some("order has no legs".to_string());
    }
    if order.legs.len() > limits.max_legs {
        return Some(format!(
            "order has {} legs; max_legs={}",
            order.legs.len(),
            limits.max_legs
        ));
    }

    for (i, leg) in order.legs.iter().enumerate() {
        if leg.quantity <= 0 {
            return Some(format!("leg {i}: quantity {} must be positive", leg.quantity));
        }
        if leg.price_micros <= 0 {
            return Some(format!(
                "leg {i}: price_micros {} must be positive",
                leg.price_micros
            ));
        }
        if leg.contract.strike_micros <= 0 {
            return Some(format!(
                "leg {i}: strike_micros {} must be positive",
                leg.contract.strike_micros
            ));
        }
        if leg.contract.underlying != order.symbol {
            return Some(format!(
                "leg {i}: underlying {} does not match order symbol {}",
                leg.contract.underlying, order.symbol
            ));
        }
    }

    // Offsetting pairs: same series, opposite side.
    for (i, a) in order.legs.iter().enumerate() {
        for (j, b) in order.legs.iter().enumerate().skip(i + 1) {
            if !a.contract.same_series(&b.contract) || a.action == b.action {
                continue;
            }
            let width = (a.contract.strike_micros as i128 - b.contract.strike_micros as i128).abs();
            if width < limits.min_spread_width_micros as i128 {
                return Some(format!(
                    "legs {i}/{j}: spread width {width} < min_spread_width_micros {}",
                    limits.min_spread_width_micros
                ));
            }
        }
    }

    // The same contract and side twice should be one leg with a larger quantity.
    for (i, a) in order.legs.iter().enumerate() {
        for (j, b) in order.legs.iter().enumerate().skip(i + 1) {
            if a.contract == b.contract && a.action == b.action {
                return Some(format!("legs {i}/{j}: duplicate contract {}", a.contract.occ_symbol()));
            }
        }
    }

    None
}
