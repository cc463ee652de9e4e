//! Broker outages seen by the execution gate.
//!
//! GREEN when: a venue that is down yields BROKER_UNAVAILABLE with a
//! BROKER_UNAVAILABLE audit event and no trade record; a timeout is treated
//! the same way; a transient error is retried and the order goes through;
//! none of this moves the risk state.

use std::time::Duration;

use tg_audit::AuditEventType;
use tg_execution::BrokerError;
use tg_schemas::{usd, ReasonCode, TradeOutcome};
use tg_testkit::{put_credit_spread, Rig};

#[tokio::test]
async fn venue_down_is_broker_unavailable_not_a_rejection() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    let before = tg_db::load_risk_state(rig.pool()).await.unwrap();
    rig.venue.set_down(true).await;

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert_eq!(out.code(), Some(ReasonCode::BrokerUnavailable));
    assert!(tg_db::trade_records(rig.pool(), &out.trade_id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(rig.events_of(AuditEventType::BrokerUnavailable).await.unwrap().len(), 1);
    assert_eq!(tg_db::load_risk_state(rig.pool()).await.unwrap(), before);
}

#[tokio::test]
async fn slow_venue_times_out_as_unavailable() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    // Above the fast retry policy's per-attempt deadline.
    rig.venue.set_latency(Some(Duration::from_secs(2))).await;

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert_eq!(out.code(), Some(ReasonCode::BrokerUnavailable));
    assert!(out.error.unwrap().message.contains("timed out"));
}

#[tokio::test]
async fn transient_error_is_retried() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    rig.venue
        .fail_next(BrokerError::Unavailable("connection reset".into()))
        .await;

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert!(out.success, "{:?}", out.error);
    let outcomes: Vec<TradeOutcome> = tg_db::trade_records(rig.pool(), &out.trade_id)
        .await
        .unwrap()
        .iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(outcomes, vec![TradeOutcome::Validated, TradeOutcome::Submitted]);
}
