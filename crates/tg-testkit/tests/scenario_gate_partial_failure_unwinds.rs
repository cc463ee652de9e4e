//! A two-leg spread on a connection without atomic multi-leg support where
//! the second leg is refused by the venue.
//!
//! GREEN when: the filled first leg is closed by a compensating order priced
//! through its mark by the unwind slippage, a PARTIAL_FAILURE record is written with needs_review set, a critical alert
//! names the trade, resubmitting the same order replays the failure without
//! touching the venue, and the risk state is unchanged.

use tg_audit::AuditEventType;
use tg_execution::{unwind_client_order_id, AlertSeverity};
use tg_schemas::{usd, Action, ReasonCode, TradeOutcome};
use tg_testkit::{put_credit_spread, Rig};

#[tokio::test]
async fn second_leg_rejection_unwinds_first_leg_and_flags_review() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    rig.venue.reject_client_suffix(":1").await;
    let before = tg_db::load_risk_state(rig.pool()).await.unwrap();

    let order = put_credit_spread("SPY", usd(350), usd(500));
    let out = rig.gate.submit(&order).await.unwrap();

    assert!(!out.success);
    assert_eq!(out.code(), Some(ReasonCode::BrokerRejected));
    // Leg 0 plus its compensating close.
    assert_eq!(out.broker_order_ids.len(), 2);

    let venue = rig.venue.snapshot().await.unwrap();
    let close = &venue.orders[&unwind_client_order_id(&out.trade_id, 0)];
    // Short 400P filled at 2.50 (the mark); the close buys 50 bps through it.
    assert_eq!(close.legs[0].action, Action::Buy);
    assert_eq!(close.legs[0].limit_price_micros, 2_512_500);
    assert!(venue.positions.is_empty(), "unwind left a position open");

    let records = tg_db::trade_records(rig.pool(), &out.trade_id).await.unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.outcome, TradeOutcome::PartialFailure);
    assert!(last.needs_review);
    assert_eq!(tg_db::needs_review_count(rig.pool()).await.unwrap(), 1);

    let ev = rig.events_of(AuditEventType::OrderPartialFailure).await.unwrap();
    assert_eq!(ev.len(), 1);
    assert_eq!(ev[0].payload["failed_leg"], 1);
    assert_eq!(ev[0].payload["unwind_clean"], true);

    let alerts = rig.trader_alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, "PARTIAL_FAILURE");
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].trade_id.as_deref(), Some(out.trade_id.as_str()));

    // Same order again: replayed, nothing new at the venue.
    let orders_before = venue.orders.len();
    let again = rig.gate.submit(&order).await.unwrap();
    assert!(again.replayed);
    assert!(!again.success);
    assert_eq!(again.trade_id, out.trade_id);
    assert_eq!(rig.venue.snapshot().await.unwrap().orders.len(), orders_before);

    assert_eq!(tg_db::load_risk_state(rig.pool()).await.unwrap(), before);
}

#[tokio::test]
async fn atomic_connection_places_one_combo_order() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    let gate = tg_execution::ExecutionGate::new(
        rig.pool().clone(),
        std::sync::Arc::new(rig.venue.connect("tg-trader-combo").with_atomic_multileg(true)),
        rig.trader_alerts.clone(),
        tg_schemas::SafetyLimits::conservative_defaults(),
        tg_testkit::fast_retry(),
    );

    let out = gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert!(out.success, "{:?}", out.error);
    assert_eq!(out.broker_order_ids.len(), 1);
    assert!(rig
        .venue
        .snapshot()
        .await
        .unwrap()
        .orders
        .contains_key(&tg_execution::combo_client_order_id(&out.trade_id)));
}

#[tokio::test]
async fn unwind_slippage_is_configurable() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    rig.venue.reject_client_suffix(":1").await;
    let gate = tg_execution::ExecutionGate::new(
        rig.pool().clone(),
        std::sync::Arc::new(rig.venue.connect("tg-trader-wide")),
        rig.trader_alerts.clone(),
        tg_schemas::SafetyLimits::conservative_defaults(),
        tg_testkit::fast_retry(),
    )
    .with_unwind_slippage_bps(200);

    let out = gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert_eq!(out.code(), Some(ReasonCode::BrokerRejected));

    let venue = rig.venue.snapshot().await.unwrap();
    let close = &venue.orders[&unwind_client_order_id(&out.trade_id, 0)];
    assert_eq!(close.legs[0].limit_price_micros, 2_550_000);
}
