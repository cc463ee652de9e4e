//! The trading process freezes while the watchdog's broker is also down.
//!
//! GREEN when: the stale heartbeat still kills the process and sets the
//! emergency stop; the outage is audited and alerted once; the flatten stays
//! pending with a FLATTEN_FAILED audit event per failed cycle but a single
//! alert; once the venue is back the next poll flattens and clears the
//! pending flag.

use chrono::{Duration as ChronoDuration, Utc};
use tg_audit::AuditEventType;
use tg_schemas::{usd, ContractDescriptor, OptionRight};
use tg_testkit::{Rig, TRADER_CLIENT_ID};

#[tokio::test]
async fn flatten_stays_pending_until_the_broker_returns() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    let now = Utc::now();
    rig.open_session(now, usd(100_000)).await.unwrap();
    let expiry = chrono::NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
    rig.venue
        .set_position(
            ContractDescriptor::new("SPY", expiry, usd(450), OptionRight::Call),
            1,
            2_000_000,
        )
        .await
        .unwrap();
    tg_db::write_heartbeat(
        rig.pool(),
        now - ChronoDuration::seconds(90),
        5151,
        TRADER_CLIENT_ID,
        None,
    )
    .await
    .unwrap();
    rig.venue.set_down(true).await;

    let r1 = rig.watchdog.poll_once(now).await.unwrap();
    assert!(r1.broker_error.is_some());
    assert!(r1.drawdown.is_none(), "a broker outage is not a drawdown reading");
    assert_eq!(rig.terminator.killed(), vec![5151]);
    assert!(r1.emergency_stop_set);
    assert!(r1.flatten_pending);

    let r2 = rig
        .watchdog
        .poll_once(now + ChronoDuration::seconds(10))
        .await
        .unwrap();
    assert!(r2.flatten_pending);

    assert_eq!(rig.events_of(AuditEventType::BrokerUnavailable).await.unwrap().len(), 1);
    assert_eq!(rig.events_of(AuditEventType::FlattenFailed).await.unwrap().len(), 2);
    assert_eq!(rig.watchdog_alerts.count("BROKER_UNAVAILABLE"), 1);
    assert_eq!(rig.watchdog_alerts.count("FLATTEN_FAILED"), 1);

    rig.venue.set_down(false).await;
    let r3 = rig
        .watchdog
        .poll_once(now + ChronoDuration::seconds(20))
        .await
        .unwrap();
    assert!(!r3.flatten_pending);
    assert_eq!(r3.flatten.unwrap().submitted.len(), 1);
    assert_eq!(rig.events_of(AuditEventType::FlattenSubmitted).await.unwrap().len(), 1);
    assert!(rig.venue.snapshot().await.unwrap().positions.is_empty());
    assert!(rig.watchdog.flatten_pending().await.is_none());
}

#[tokio::test]
async fn operator_requested_flatten_runs_on_next_poll() {
    let rig = Rig::new(usd(100_000)).await.unwrap();
    let now = Utc::now();
    rig.open_session(now, usd(100_000)).await.unwrap();
    let expiry = chrono::NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
    rig.venue
        .set_position(
            ContractDescriptor::new("QQQ", expiry, usd(380), OptionRight::Put),
            2,
            4_000_000,
        )
        .await
        .unwrap();

    rig.watchdog.request_flatten("operator drill").await;
    let report = rig.watchdog.poll_once(now).await.unwrap();
    assert_eq!(report.flatten.unwrap().submitted.len(), 1);
    assert!(!report.flatten_pending);
    assert!(rig.venue.snapshot().await.unwrap().positions.is_empty());
}
