//! Line protocol of the trading process.
//!
//! One JSON document per line on stdin: a bare `Order`, `{"fill": FillReport}`
//! or `{"close": {"trade_id", "realized_pnl_micros"}}`. One JSON reply per
//! input line on stdout.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tg_execution::SubmitOutcome;
use tg_schemas::{FillReport, Order, RiskState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseReport {
    pub trade_id: String,
    pub realized_pnl_micros: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraderInput {
    Fill { fill: FillReport },
    Close { close: CloseReport },
    Order(Order),
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<TraderInput>> {
    let t = line.trim();
    if t.is_empty() || t.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(t)
        .map(Some)
        .context("input line is not an order, fill or close")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraderOutput {
    Submit(SubmitOutcome),
    Fill { fill_id: String, recorded: bool },
    Close {
        trade_id: String,
        applied: bool,
        risk_state: Option<RiskState>,
    },
    Error { message: String },
}
