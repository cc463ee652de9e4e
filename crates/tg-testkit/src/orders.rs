//! Sample upstream orders.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tg_schemas::{usd, Action, ContractDescriptor, Leg, OptionRight, Order};

pub const EXPIRY: (i32, u32, u32) = (2026, 12, 18);

fn expiry() -> NaiveDate {
    let (y, m, d) = EXPIRY;
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// $5 wide put credit spread: sell 400P @ 2.50, buy 395P @ 1.00.
pub fn put_credit_spread(symbol: &str, max_risk_micros: i64, capital_micros: i64) -> Order {
    Order {
        symbol: symbol.to_string(),
        strategy: "put_credit_spread".to_string(),
        legs: vec![
            Leg::new(
                Action::Sell,
                ContractDescriptor::new(symbol, expiry(), usd(400), OptionRight::Put),
                1,
                2_500_000,
            ),
            Leg::new(
                Action::Buy,
                ContractDescriptor::new(symbol, expiry(), usd(395), OptionRight::Put),
                1,
                1_000_000,
            ),
        ],
        max_risk_micros,
        capital_required_micros: capital_micros,
        metadata: BTreeMap::new(),
    }
}

/// Single-leg long call; risk and capital are the premium paid.
pub fn long_call(symbol: &str, strike_usd: i64, quantity: i64, price_micros: i64) -> Order {
    let premium = price_micros * quantity * 100;
    Order {
        symbol: symbol.to_string(),
        strategy: "long_call".to_string(),
        legs: vec![Leg::new(
            Action::Buy,
            ContractDescriptor::new(symbol, expiry(), usd(strike_usd), OptionRight::Call),
            quantity,
            price_micros,
        )],
        max_risk_micros: premium,
        capital_required_micros: premium,
        metadata: BTreeMap::new(),
    }
}
