//! Integer-micros pricing for orders that must execute now.
//!
//! Compensating closes and emergency flattens cross the mark by a slippage
//! allowance instead of resting at a stale entry price.

use tg_schemas::Action;

/// Slippage allowed on a compensating close, in basis points.
pub const DEFAULT_UNWIND_SLIPPAGE_BPS: u32 = 50;

/// Marketable limit: mark minus slippage when selling, plus when buying.
/// Never below one micro.
pub fn liquidating_limit_micros(mark_price_micros: i64, action: Action, slippage_bps: u32) -> i64 {
    let bps = slippage_bps as i128;
    let mark = mark_price_micros.max(0) as i128;
    let px = match action {
        Action::Sell => (mark * (10_000 - bps)).max(0) / 10_000,
        Action::Buy => (mark * (10_000 + bps) + 9_999) / 10_000,
    };
    i64::try_from(px).unwrap_or(i64::MAX).max(1)
}
