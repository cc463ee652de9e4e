//! Emergency flatten run twice against positions whose liquidating orders
//! are still working, and against entry orders the trading process left
//! working.
//!
//! GREEN when: the first pass places one order per position with a
//! deterministic client id at a marketable limit; the second pass places
//! nothing and reports the orders as already working; entry orders still
//! working are canceled and can no longer fill.

use std::sync::Arc;

use tg_broker_paper::FillMode;
use tg_execution::{leg_client_order_id, liquidating_limit_micros, BrokerAdapter};
use tg_schemas::{usd, Action, ContractDescriptor, OptionRight};
use tg_testkit::{fast_retry, put_credit_spread, Rig, WATCHDOG_CLIENT_ID};
use tg_watchdog::emergency_flatten;

#[tokio::test]
async fn flatten_twice_places_no_duplicate_orders() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.venue.set_fill_mode(FillMode::Resting).await.unwrap();
    let expiry = chrono::NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
    rig.venue
        .set_position(
            ContractDescriptor::new("SPY", expiry, usd(450), OptionRight::Call),
            4,
            2_000_000,
        )
        .await
        .unwrap();
    rig.venue
        .set_position(
            ContractDescriptor::new("SPY", expiry, usd(440), OptionRight::Call),
            -4,
            3_000_000,
        )
        .await
        .unwrap();

    let broker: Arc<dyn BrokerAdapter> = Arc::new(rig.venue.connect(WATCHDOG_CLIENT_ID));

    let first = emergency_flatten(broker.as_ref(), &fast_retry(), 50).await.unwrap();
    assert_eq!(first.submitted.len(), 2);
    assert!(first.already_working.is_empty());
    assert!(first.is_complete());

    let second = emergency_flatten(broker.as_ref(), &fast_retry(), 50).await.unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.already_working.len(), 2);

    assert_eq!(rig.venue_orders_with_prefix("flatten:").await.unwrap(), 2);

    let open = broker.open_orders().await.unwrap();
    let long_close = open
        .iter()
        .find(|o| o.client_order_id.ends_with(":4"))
        .unwrap();
    assert_eq!(long_close.legs[0].action, Action::Sell);
    assert_eq!(
        long_close.legs[0].limit_price_micros,
        liquidating_limit_micros(2_000_000, Action::Sell, 50)
    );
    let short_close = open
        .iter()
        .find(|o| o.client_order_id.ends_with(":-4"))
        .unwrap();
    assert_eq!(short_close.legs[0].action, Action::Buy);
    assert_eq!(short_close.legs[0].quantity, 4);
}

#[tokio::test]
async fn flatten_cancels_entry_orders_left_working() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    rig.venue.set_fill_mode(FillMode::Resting).await.unwrap();

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    assert!(out.success, "{:?}", out.error);
    assert_eq!(out.broker_order_ids.len(), 2);

    let broker = rig.venue.connect(WATCHDOG_CLIENT_ID);
    let report = emergency_flatten(&broker, &fast_retry(), 50).await.unwrap();
    assert!(report.is_complete());
    assert!(report.submitted.is_empty(), "nothing had filled yet");
    let mut canceled = report.canceled.clone();
    canceled.sort();
    assert_eq!(
        canceled,
        vec![
            leg_client_order_id(&out.trade_id, 0),
            leg_client_order_id(&out.trade_id, 1)
        ]
    );

    for id in &out.broker_order_ids {
        assert!(!rig.venue.fill_working(id).await.unwrap(), "{id} still fillable");
    }
    assert!(rig.venue.snapshot().await.unwrap().positions.is_empty());
    assert!(broker.open_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn flatten_closes_what_filled_and_cancels_the_rest() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    rig.open_session(chrono::Utc::now(), usd(100_000)).await.unwrap();
    rig.venue.set_fill_mode(FillMode::Resting).await.unwrap();

    let out = rig
        .gate
        .submit(&put_credit_spread("SPY", usd(350), usd(500)))
        .await
        .unwrap();
    // Short leg fills; the long leg is still working when the trader dies.
    assert!(rig.venue.fill_working(&out.broker_order_ids[0]).await.unwrap());

    let broker = rig.venue.connect(WATCHDOG_CLIENT_ID);
    let report = emergency_flatten(&broker, &fast_retry(), 50).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.canceled, vec![leg_client_order_id(&out.trade_id, 1)]);
    assert_eq!(report.submitted.len(), 1);
    assert!(report.submitted[0].starts_with("flatten:"));
    assert!(!rig.venue.fill_working(&out.broker_order_ids[1]).await.unwrap());
}
