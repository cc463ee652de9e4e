//! Trading session end to end against the in-memory paper venue.
//!
//! GREEN when: start opens the day and writes a heartbeat carrying the
//! session pid; an order line is submitted and its immediate fills are
//! recorded; a close line moves the loss counters exactly once; a bad line
//! yields an error reply without stopping the loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tg_broker_paper::PaperVenue;
use tg_execution::{LogAlerter, RetryPolicy};
use tg_runtime::TradingSession;
use tg_schemas::{
    usd, Action, ContractDescriptor, Leg, OptionRight, Order, SafetyLimits, TradeOutcome,
};
use tokio::io::BufReader;

fn spread(symbol: &str) -> Order {
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
        max_risk_micros: usd(350),
        capital_required_micros: usd(500),
        metadata: BTreeMap::new(),
    }
}

async fn session(dir: &tempfile::TempDir) -> (TradingSession, sqlx::SqlitePool) {
    let pool = tg_db::open(dir.path().join("tg.sqlite")).await.unwrap();
    let venue = PaperVenue::in_memory(usd(100_000));
    let s = TradingSession::new(
        pool.clone(),
        Arc::new(venue.connect("tg-trader")),
        Arc::new(LogAlerter),
        SafetyLimits::conservative_defaults(),
        RetryPolicy::single(Duration::from_secs(1)),
        Duration::from_secs(3600),
    )
    .with_pid(4242);
    (s, pool)
}

#[tokio::test]
async fn start_opens_session_and_beats() {
    let dir = tempfile::tempdir().unwrap();
    let (s, pool) = session(&dir).await;
    let now = Utc::now();

    let hb = s.start(now).await.unwrap();
    assert_eq!(hb.pid, 4242);
    assert_eq!(hb.client_id, "tg-trader");
    assert_eq!(hb.account_value_micros, Some(usd(100_000)));

    let st = tg_db::load_risk_state(&pool).await.unwrap();
    assert_eq!(st.session_day, Some(now.date_naive()));
    assert_eq!(st.session_start_account_value_micros, usd(100_000));

    let hb2 = s.heartbeat(Utc::now()).await.unwrap();
    assert_eq!(hb2.seq, hb.seq + 1);
}

#[tokio::test]
async fn json_lines_drive_submit_fill_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let (s, pool) = session(&dir).await;
    s.start(Utc::now()).await.unwrap();

    let order = spread("SPY");
    let trade_id = tg_execution::trade_id(&order).unwrap();
    let input = format!(
        "{}\n\n{}\n{}\nnot json\n",
        serde_json::to_string(&order).unwrap(),
        serde_json::json!({ "close": { "trade_id": trade_id, "realized_pnl_micros": -usd(40) } }),
        serde_json::json!({ "close": { "trade_id": trade_id, "realized_pnl_micros": -usd(40) } }),
    );

    let mut out: Vec<u8> = Vec::new();
    s.run(
        BufReader::new(input.as_bytes()),
        &mut out,
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    let replies: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(replies.len(), 4, "blank line gets no reply");

    assert_eq!(replies[0]["submit"]["success"], true);
    assert_eq!(replies[0]["submit"]["trade_id"], trade_id.as_str());
    assert_eq!(replies[1]["close"]["applied"], true);
    assert_eq!(replies[1]["close"]["risk_state"]["consecutive_losses"], 1);
    assert_eq!(replies[2]["close"]["applied"], false);
    assert!(replies[3]["error"]["message"].is_string());

    let records = tg_db::trade_records(&pool, &trade_id).await.unwrap();
    let outcomes: Vec<TradeOutcome> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes[..2], [TradeOutcome::Validated, TradeOutcome::Submitted]);
    assert_eq!(
        outcomes.iter().filter(|o| **o == TradeOutcome::Filled).count(),
        2,
        "one FILLED record per leg fill"
    );
    assert_eq!(tg_db::fills_for_trade(&pool, &trade_id).await.unwrap().len(), 2);

    let st = tg_db::load_risk_state(&pool).await.unwrap();
    assert_eq!(st.daily_realized_loss_micros, usd(40));
    assert_eq!(st.consecutive_losses, 1);
}

#[tokio::test]
async fn replayed_fill_poll_records_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let (s, _pool) = session(&dir).await;
    s.start(Utc::now()).await.unwrap();

    let out = s.gate().submit(&spread("QQQ")).await.unwrap();
    assert!(out.success);
    assert_eq!(s.sync_fills().await.unwrap(), 2);
    assert_eq!(s.sync_fills().await.unwrap(), 0);
}
