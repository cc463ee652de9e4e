//! Resubmitting the same order, and fills arriving more than once.
//!
//! GREEN when: a second submit of an identical order replays the first
//! outcome with the same broker order ids and places nothing new; a changed
//! order gets a new trade id; a replayed fill writes no second record.

use tg_audit::AuditEventType;
use tg_execution::BrokerAdapter;
use tg_schemas::{usd, TradeOutcome};
use tg_testkit::{long_call, put_credit_spread, Rig};

#[tokio::test]
async fn identical_order_is_not_placed_twice() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();

    let order = put_credit_spread("SPY", usd(350), usd(500));
    let first = rig.gate.submit(&order).await.unwrap();
    assert!(first.success);
    assert!(!first.replayed);

    let second = rig.gate.submit(&order).await.unwrap();
    assert!(second.success);
    assert!(second.replayed);
    assert_eq!(second.broker_order_ids, first.broker_order_ids);

    assert_eq!(rig.venue.snapshot().await.unwrap().orders.len(), 2);
    assert_eq!(rig.events_of(AuditEventType::OrderSubmitted).await.unwrap().len(), 1);

    let mut changed = order.clone();
    changed.metadata.insert("attempt".into(), "2".into());
    let third = rig.gate.submit(&changed).await.unwrap();
    assert_ne!(third.trade_id, first.trade_id);
}

#[tokio::test]
async fn broker_fills_are_recorded_once() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    let out = rig
        .gate
        .submit(&long_call("QQQ", 400, 2, 1_500_000))
        .await
        .unwrap();
    assert!(out.success);

    let trader = rig.venue.connect("tg-trader");
    let fills = trader.fills().await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].trade_id, out.trade_id);

    assert!(rig.gate.record_fill(&fills[0]).await.unwrap());
    assert!(!rig.gate.record_fill(&fills[0]).await.unwrap());

    let records = tg_db::trade_records(rig.pool(), &out.trade_id).await.unwrap();
    assert_eq!(
        records.iter().filter(|r| r.outcome == TradeOutcome::Filled).count(),
        1
    );
    assert_eq!(rig.events_of(AuditEventType::FillRecorded).await.unwrap().len(), 1);
}

#[tokio::test]
async fn fill_for_unknown_trade_is_an_error() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    let fill = tg_schemas::FillReport {
        trade_id: "no-such-trade".into(),
        broker_order_id: "paper-99".into(),
        fill_id: "paper-fill-99".into(),
        contract_symbol: "SPY261218C00450000".into(),
        action: tg_schemas::Action::Buy,
        quantity: 1,
        price_micros: 1_000_000,
        filled_at: chrono::Utc::now(),
    };
    assert!(rig.gate.record_fill(&fill).await.is_err());
}
