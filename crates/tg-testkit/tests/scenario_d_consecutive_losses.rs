//! Scenario D: five losing trades close in a row, then a sixth order.
//!
//! GREEN when: each close is applied once (a replayed close is ignored), the
//! sixth order is CONSECUTIVE_LOSS_LIMIT, and a REJECTED record carries
//! that code.

use chrono::Utc;
use tg_schemas::{usd, ReasonCode, TradeOutcome};
use tg_testkit::{put_credit_spread, Rig};

#[tokio::test]
async fn sixth_order_after_five_losses_is_refused() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(Utc::now(), usd(100_000)).await.unwrap();

    for i in 0..5 {
        let st = rig
            .gate
            .record_close(&format!("loss-{i}"), -usd(20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(st.consecutive_losses, i + 1);
    }
    assert!(rig.gate.record_close("loss-4", -usd(20)).await.unwrap().is_none());

    let st = tg_db::load_risk_state(rig.pool()).await.unwrap();
    assert_eq!(st.consecutive_losses, 5);
    assert_eq!(st.daily_realized_loss_micros, usd(100));

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(100), usd(500)))
        .await
        .unwrap();
    assert_eq!(out.code(), Some(ReasonCode::ConsecutiveLossLimit));

    let rec = tg_db::latest_trade_record(rig.pool(), &out.trade_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rec.outcome, TradeOutcome::Rejected);
    assert_eq!(rec.reason_code, Some(ReasonCode::ConsecutiveLossLimit));
}

#[tokio::test]
async fn a_win_breaks_the_streak() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(Utc::now(), usd(100_000)).await.unwrap();

    for i in 0..4 {
        rig.gate.record_close(&format!("loss-{i}"), -usd(20)).await.unwrap();
    }
    let st = rig.gate.record_close("win", usd(50)).await.unwrap().unwrap();
    assert_eq!(st.consecutive_losses, 0);
    // Profits do not pay back the realized daily loss.
    assert_eq!(st.daily_realized_loss_micros, usd(80));

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(100), usd(500)))
        .await
        .unwrap();
    assert!(out.success, "{:?}", out.error);
}
