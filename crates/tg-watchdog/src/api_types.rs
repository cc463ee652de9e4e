//! Request and response bodies for the operator HTTP surface.

use serde::{Deserialize, Serialize};
use tg_audit::AuditEvent;
use tg_schemas::{BreakerState, HeartbeatRecord, RiskState};

use crate::watchdog::PollReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub risk_state: RiskState,
    pub breaker_state: BreakerState,
    pub halted: bool,
    pub heartbeat: Option<HeartbeatRecord>,
    pub heartbeat_age_ms: Option<i64>,
    pub needs_review_trades: i64,
    pub flatten_pending: Option<String>,
    pub last_poll: Option<PollReport>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetBreakerRequest {
    pub operator: String,
    /// Move the drawdown baseline to the current account value.
    #[serde(default = "default_true")]
    pub rebase: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyStopRequest {
    pub operator: String,
    pub reason: String,
    /// Also liquidate open positions on the next watchdog cycle.
    #[serde(default)]
    pub flatten: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorRequest {
    pub operator: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionResponse {
    /// False when the flag was already in the requested state.
    pub changed: bool,
    pub risk_state: RiskState,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
