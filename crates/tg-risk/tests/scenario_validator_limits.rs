//! Validator scenarios against the conservative default limits
//! ($500 risk, $5k capital, $1k daily loss, 30% concentration, 5 losses).
//!
//! GREEN when:
//! - a $600 max-risk order is RISK_EXCEEDED and the state is untouched;
//! - a sixth order after five straight losses is CONSECUTIVE_LOSS_LIMIT;
//! - 28% -> 33% symbol exposure is CONCENTRATION_EXCEEDED;
//! - a triggered breaker rejects every order shape;
//! - every rejection carries a policy code and a non-empty message.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use tg_risk::{apply_realized_pnl, validate, Decision};
use tg_schemas::{
    usd, Action, ContractDescriptor, Leg, OptionRight, Order, PortfolioView, ReasonCode, RiskState,
    SafetyLimits,
};

fn order(symbol: &str, max_risk: i64, capital: i64) -> Order {
    let expiry = NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
    Order {
        symbol: symbol.into(),
        strategy: "put_credit_spread".into(),
        legs: vec![
            Leg::new(
                Action::Sell,
                ContractDescriptor::new(symbol, expiry, usd(400), OptionRight::Put),
                1,
                2_500_000,
            ),
            Leg::new(
                Action::Buy,
                ContractDescriptor::new(symbol, expiry, usd(395), OptionRight::Put),
                1,
                1_000_000,
            ),
        ],
        max_risk_micros: max_risk,
        capital_required_micros: capital,
        metadata: BTreeMap::new(),
    }
}

fn code_of(d: &Decision) -> ReasonCode {
    d.rejection().expect("expected a rejection").code
}

#[test]
fn scenario_a_risk_over_limit_is_rejected_and_state_unchanged() {
    let st = RiskState::new(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(), usd(50_000), Utc::now());
    let before = st.clone();

    let d = validate(
        &order("SPY", usd(600), usd(600)),
        &st,
        &SafetyLimits::conservative_defaults(),
        &PortfolioView::new(usd(50_000)),
    );

    assert_eq!(code_of(&d), ReasonCode::RiskExceeded);
    assert_eq!(st, before);
}

#[test]
fn scenario_d_sixth_order_after_five_losses_is_rejected() {
    let now = Utc::now();
    let limits = SafetyLimits::conservative_defaults();
    let pv = PortfolioView::new(usd(50_000));
    let mut st = RiskState::default();

    for _ in 0..5 {
        // Small losses keep the daily loss check out of the way.
        apply_realized_pnl(&mut st, -usd(20), now);
    }
    assert_eq!(st.consecutive_losses, 5);

    let d = validate(&order("SPY", usd(100), usd(500)), &st, &limits, &pv);
    assert_eq!(code_of(&d), ReasonCode::ConsecutiveLossLimit);
}

#[test]
fn four_losses_still_allow_trading() {
    let now = Utc::now();
    let mut st = RiskState::default();
    for _ in 0..4 {
        apply_realized_pnl(&mut st, -usd(20), now);
    }
    let d = validate(
        &order("SPY", usd(100), usd(500)),
        &st,
        &SafetyLimits::conservative_defaults(),
        &PortfolioView::new(usd(50_000)),
    );
    assert!(d.is_accept(), "{d:?}");
}

#[test]
fn scenario_e_concentration_28_to_33_percent_is_rejected() {
    let pv = PortfolioView::new(usd(10_000)).with_exposure("SPY", usd(2_800));
    let d = validate(
        &order("SPY", usd(300), usd(500)),
        &RiskState::default(),
        &SafetyLimits::conservative_defaults(),
        &pv,
    );
    assert_eq!(code_of(&d), ReasonCode::ConcentrationExceeded);

    // Exposure to a different symbol does not count.
    let d = validate(
        &order("QQQ", usd(300), usd(500)),
        &RiskState::default(),
        &SafetyLimits::conservative_defaults(),
        &pv,
    );
    assert!(d.is_accept(), "{d:?}");
}

#[test]
fn triggered_breaker_rejects_every_order() {
    let st = RiskState {
        circuit_breaker_triggered: true,
        circuit_breaker_reason: Some("drawdown -11.00%".into()),
        ..RiskState::default()
    };
    let limits = SafetyLimits::conservative_defaults();
    let pv = PortfolioView::new(usd(50_000));

    for (sym, risk, cap) in [("SPY", usd(1), usd(1)), ("QQQ", usd(100), usd(300)), ("IWM", usd(499), usd(4_999))] {
        let d = validate(&order(sym, risk, cap), &st, &limits, &pv);
        assert_eq!(code_of(&d), ReasonCode::CircuitBreakerActive);
    }
}

#[test]
fn every_rejection_has_a_policy_code_and_message() {
    let limits = SafetyLimits::conservative_defaults();
    let pv = PortfolioView::new(usd(10_000)).with_exposure("SPY", usd(2_900));
    let cases = [
        (RiskState { emergency_stop: true, ..RiskState::default() }, order("SPY", usd(1), usd(1))),
        (RiskState::default(), order("SPY", usd(501), usd(1))),
        (RiskState::default(), order("SPY", usd(1), usd(5_001))),
        (
            RiskState { daily_realized_loss_micros: usd(999), ..RiskState::default() },
            order("SPY", usd(2), usd(1)),
        ),
        (RiskState::default(), order("SPY", usd(100), usd(200))),
    ];

    for (st, o) in cases {
        let d = validate(&o, &st, &limits, &pv);
        let r = d.rejection().expect("case must reject");
        assert!(r.code.is_policy(), "{r}");
        assert!(!r.message.is_empty());
    }
}
