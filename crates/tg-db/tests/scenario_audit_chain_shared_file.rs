//! Audit log stored in SQLite.
//!
//! GREEN when:
//! - two independent pools (two processes) appending to one file still
//!   produce a single gap-free, valid chain;
//! - queries filter by trade id, event type and time range;
//! - editing a stored row behind the store's back is detected by verify.

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use tg_audit::{AuditEventType, NewAuditEvent, VerifyResult};
use tg_db::AuditQuery;

#[tokio::test]
async fn two_writers_share_one_valid_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guard.sqlite");
    let trader = tg_db::open(&path).await.unwrap();
    let watchdog = tg_db::open(&path).await.unwrap();

    let a = {
        let pool = trader.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                let ev = NewAuditEvent::new(
                    Utc::now(),
                    AuditEventType::OrderValidated,
                    "tg-trader",
                    json!({ "i": i }),
                );
                tg_db::append_audit_event(&pool, ev).await.unwrap();
            }
        })
    };
    let b = {
        let pool = watchdog.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                let ev = NewAuditEvent::new(
                    Utc::now(),
                    AuditEventType::HeartbeatStale,
                    "tg-watchdog",
                    json!({ "i": i }),
                );
                tg_db::append_audit_event(&pool, ev).await.unwrap();
            }
        })
    };
    a.await.unwrap();
    b.await.unwrap();

    let events = tg_db::all_audit_events(&trader).await.unwrap();
    assert_eq!(events.len(), 40);
    for (i, e) in events.iter().enumerate() {
        assert_eq!(e.seq, i as i64 + 1);
    }
    assert_eq!(
        tg_db::verify_audit_chain(&watchdog).await.unwrap(),
        VerifyResult::Valid { events: 40 }
    );
}

#[tokio::test]
async fn query_filters_by_trade_type_and_time() {
    let dir = tempfile::tempdir().unwrap();
    let pool = tg_db::open(dir.path().join("guard.sqlite")).await.unwrap();
    let t0 = Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap();

    let plan = [
        (0, AuditEventType::OrderValidated, Some("t-1")),
        (1, AuditEventType::OrderSubmitted, Some("t-1")),
        (2, AuditEventType::OrderRejected, Some("t-2")),
        (3, AuditEventType::CircuitBreakerTriggered, None),
    ];
    for (min, t, trade) in plan {
        let mut ev = NewAuditEvent::new(t0 + Duration::minutes(min), t, "tg-trader", json!({}));
        if let Some(id) = trade {
            ev = ev.with_trade_id(id);
        }
        tg_db::append_audit_event(&pool, ev).await.unwrap();
    }

    let by_trade = tg_db::query_audit_events(
        &pool,
        &AuditQuery {
            trade_id: Some("t-1".into()),
            ..AuditQuery::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_trade.len(), 2);

    let by_type = tg_db::query_audit_events(
        &pool,
        &AuditQuery {
            event_type: Some(AuditEventType::OrderRejected),
            ..AuditQuery::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].trade_id.as_deref(), Some("t-2"));

    let window = tg_db::query_audit_events(
        &pool,
        &AuditQuery {
            since: Some(t0 + Duration::minutes(1)),
            until: Some(t0 + Duration::minutes(3)),
            ..AuditQuery::default()
        },
    )
    .await
    .unwrap();
    let seqs: Vec<i64> = window.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![2, 3]);

    let limited = tg_db::query_audit_events(
        &pool,
        &AuditQuery {
            limit: Some(1),
            ..AuditQuery::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].seq, 1);
}

#[tokio::test]
async fn tampered_row_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = tg_db::open(dir.path().join("guard.sqlite")).await.unwrap();
    for i in 0..3 {
        let ev = NewAuditEvent::new(
            Utc::now(),
            AuditEventType::OrderValidated,
            "tg-trader",
            json!({ "i": i }),
        );
        tg_db::append_audit_event(&pool, ev).await.unwrap();
    }

    // The append-only trigger blocks ordinary edits.
    assert!(sqlx::query("UPDATE audit_events SET actor = 'x' WHERE seq = 2")
        .execute(&pool)
        .await
        .is_err());

    // Someone with file access drops it and rewrites history.
    sqlx::query("DROP TRIGGER audit_events_no_update")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(r#"UPDATE audit_events SET payload = '{"i":99}' WHERE seq = 2"#)
        .execute(&pool)
        .await
        .unwrap();

    match tg_db::verify_audit_chain(&pool).await.unwrap() {
        VerifyResult::Broken { seq, .. } => assert_eq!(seq, 2),
        other => panic!("expected broken chain, got {other:?}"),
    }
}
