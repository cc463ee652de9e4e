//! Paper venue behavior the gate and the watchdog rely on.
//!
//! GREEN when:
//! - placement is idempotent by client order id;
//! - immediate fills move positions and are visible only to their owner;
//! - resting orders are listed as open and can be canceled;
//! - two connections on one state file see the same venue;
//! - injected outages and rejections surface as `BrokerError`.

use chrono::NaiveDate;
use tg_broker_paper::{FillMode, PaperVenue};
use tg_execution::{
    BrokerAdapter, BrokerError, BrokerOrderStatus, OrderLegRequest, PlaceOrderRequest,
};
use tg_schemas::{usd, Action, ContractDescriptor, OptionRight};

fn put(strike: i64) -> ContractDescriptor {
    ContractDescriptor::new(
        "SPY",
        NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
        usd(strike),
        OptionRight::Put,
    )
}

fn req(client_order_id: &str, action: Action, qty: i64) -> PlaceOrderRequest {
    PlaceOrderRequest {
        client_order_id: client_order_id.into(),
        legs: vec![OrderLegRequest {
            action,
            contract: put(440),
            quantity: qty,
            limit_price_micros: 2_000_000,
        }],
    }
}

#[tokio::test]
async fn placement_is_idempotent_and_fills_move_positions() {
    let venue = PaperVenue::in_memory(usd(10_000));
    let trader = venue.connect("tg-trader");
    let watchdog = venue.connect("tg-watchdog");

    let a = trader.place_order(&req("c-1", Action::Buy, 2)).await.unwrap();
    let b = trader.place_order(&req("c-1", Action::Buy, 2)).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.status, BrokerOrderStatus::Filled);

    let positions = watchdog.positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].quantity, 2);

    assert_eq!(trader.fills().await.unwrap().len(), 1);
    assert!(watchdog.fills().await.unwrap().is_empty());

    trader.place_order(&req("c-2", Action::Sell, 2)).await.unwrap();
    assert!(watchdog.positions().await.unwrap().is_empty());
}

#[tokio::test]
async fn resting_orders_are_open_until_filled_or_canceled() {
    let venue = PaperVenue::in_memory(usd(10_000));
    venue.set_fill_mode(FillMode::Resting).await.unwrap();
    let b = venue.connect("tg-trader");

    let a1 = b.place_order(&req("c-1", Action::Buy, 1)).await.unwrap();
    let a2 = b.place_order(&req("c-2", Action::Buy, 1)).await.unwrap();
    assert_eq!(a1.status, BrokerOrderStatus::Accepted);
    assert_eq!(b.open_orders().await.unwrap().len(), 2);

    b.cancel_order(&a1.broker_order_id).await.unwrap();
    assert!(venue.fill_working(&a2.broker_order_id).await.unwrap());
    assert!(!venue.fill_working(&a1.broker_order_id).await.unwrap());
    assert!(b.open_orders().await.unwrap().is_empty());

    let err = b.cancel_order(&a2.broker_order_id).await.unwrap_err();
    assert!(matches!(err, BrokerError::Rejected(_)));
    assert_eq!(b.positions().await.unwrap()[0].quantity, 1);
}

#[tokio::test]
async fn two_connections_share_one_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("venue.json");

    let trader = PaperVenue::open(&path, usd(10_000)).unwrap().connect("tg-trader");
    let watchdog_venue = PaperVenue::open(&path, usd(1)).unwrap();
    let watchdog = watchdog_venue.connect("tg-watchdog");

    // Existing file wins over the initial value.
    assert_eq!(watchdog.account().await.unwrap().account_value_micros, usd(10_000));

    trader.place_order(&req("c-1", Action::Sell, 3)).await.unwrap();
    let seen = watchdog.positions().await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].quantity, -3);

    watchdog_venue.set_account_value(usd(8_900)).await.unwrap();
    assert_eq!(trader.account().await.unwrap().account_value_micros, usd(8_900));
}

#[tokio::test]
async fn injected_faults_surface_as_broker_errors() {
    let venue = PaperVenue::in_memory(usd(10_000));
    let b = venue.connect("tg-trader");

    venue.set_down(true).await;
    assert!(matches!(b.account().await, Err(BrokerError::Unavailable(_))));
    venue.set_down(false).await;

    venue.fail_next(BrokerError::Unavailable("blip".into())).await;
    assert!(b.account().await.is_err());
    assert!(b.account().await.is_ok());

    venue.reject_client_suffix(":1").await;
    assert!(b.place_order(&req("t:0", Action::Buy, 1)).await.is_ok());
    assert!(matches!(
        b.place_order(&req("t:1", Action::Buy, 1)).await,
        Err(BrokerError::Rejected(_))
    ));

    let mut combo = req("t:combo", Action::Buy, 1);
    combo.legs.push(combo.legs[0].clone());
    assert!(matches!(b.place_order(&combo).await, Err(BrokerError::Rejected(_))));
    let atomic = venue.connect("tg-trader").with_atomic_multileg(true);
    assert!(atomic.place_order(&combo).await.is_ok());
}
