use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{Action, Order};
use crate::reason::ReasonCode;

/// Lifecycle stage captured by one trade record row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    Validated,
    Rejected,
    Submitted,
    Filled,
    PartialFailure,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Validated => "VALIDATED",
            TradeOutcome::Rejected => "REJECTED",
            TradeOutcome::Submitted => "SUBMITTED",
            TradeOutcome::Filled => "FILLED",
            TradeOutcome::PartialFailure => "PARTIAL_FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDATED" => Some(TradeOutcome::Validated),
            "REJECTED" => Some(TradeOutcome::Rejected),
            "SUBMITTED" => Some(TradeOutcome::Submitted),
            "FILLED" => Some(TradeOutcome::Filled),
            "PARTIAL_FAILURE" => Some(TradeOutcome::PartialFailure),
            _ => None,
        }
    }
}

/// A trade record about to be appended. The store assigns `seq`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTradeRecord {
    pub trade_id: String,
    pub outcome: TradeOutcome,
    pub reason_code: Option<ReasonCode>,
    pub reason: Option<String>,
    pub order: Order,
    pub broker_order_ids: Vec<String>,
    /// Set on partial multi-leg failures that left state needing a human.
    pub needs_review: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A persisted trade record. Immutable once written; corrections are new rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub seq: i64,
    pub trade_id: String,
    pub outcome: TradeOutcome,
    pub reason_code: Option<ReasonCode>,
    pub reason: Option<String>,
    pub order: Order,
    pub broker_order_ids: Vec<String>,
    pub needs_review: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Single most-recent liveness record, overwritten by the trading process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub ts: DateTime<Utc>,
    /// OS pid of the trading process; the watchdog's termination target.
    pub pid: u32,
    pub client_id: String,
    /// Increments on every write; lets readers tell a fresh beat from a replay.
    pub seq: i64,
    pub account_value_micros: Option<i64>,
    /// Kernel start time of `pid`; `None` where the platform has no procfs.
    #[serde(default)]
    pub process_start_ticks: Option<i64>,
    /// Set when the trading process exited cleanly after this beat.
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl HeartbeatRecord {
    /// Age of the heartbeat at `now`, in milliseconds. Future timestamps
    /// (clock skew) count as age zero.
    pub fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.ts).num_milliseconds().max(0)
    }
}

/// Confirmed execution reported by the broker for one leg order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillReport {
    pub trade_id: String,
    pub broker_order_id: String,
    /// Broker-assigned fill id; de-duplication key.
    pub fill_id: String,
    pub contract_symbol: String,
    pub action: Action,
    pub quantity: i64,
    pub price_micros: i64,
    pub filled_at: DateTime<Utc>,
}
