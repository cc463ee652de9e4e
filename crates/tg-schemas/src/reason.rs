use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable machine-readable code attached to every rejection or failure.
///
/// The string form (`as_str`) is what lands in logs, trade records and the
/// audit log. It must never change once shipped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // Policy rejections (expected; logged, not alarms).
    EmergencyStop,
    CircuitBreakerActive,
    RiskExceeded,
    CapitalExceeded,
    DailyLossLimit,
    ConsecutiveLossLimit,
    ConcentrationExceeded,
    InvalidLeg,

    // Infrastructure failures.
    BrokerUnavailable,
    BrokerRejected,
}

impl ReasonCode {
    /// Every policy rejection code, in validator evaluation order.
    pub const POLICY: [ReasonCode; 8] = [
        ReasonCode::EmergencyStop,
        ReasonCode::CircuitBreakerActive,
        ReasonCode::RiskExceeded,
        ReasonCode::CapitalExceeded,
        ReasonCode::DailyLossLimit,
        ReasonCode::ConsecutiveLossLimit,
        ReasonCode::ConcentrationExceeded,
        ReasonCode::InvalidLeg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::EmergencyStop => "EMERGENCY_STOP",
            ReasonCode::CircuitBreakerActive => "CIRCUIT_BREAKER_ACTIVE",
            ReasonCode::RiskExceeded => "RISK_EXCEEDED",
            ReasonCode::CapitalExceeded => "CAPITAL_EXCEEDED",
            ReasonCode::DailyLossLimit => "DAILY_LOSS_LIMIT",
            ReasonCode::ConsecutiveLossLimit => "CONSECUTIVE_LOSS_LIMIT",
            ReasonCode::ConcentrationExceeded => "CONCENTRATION_EXCEEDED",
            ReasonCode::InvalidLeg => "INVALID_LEG",
            ReasonCode::BrokerUnavailable => "BROKER_UNAVAILABLE",
            ReasonCode::BrokerRejected => "BROKER_REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EMERGENCY_STOP" => Some(ReasonCode::EmergencyStop),
            "CIRCUIT_BREAKER_ACTIVE" => Some(ReasonCode::CircuitBreakerActive),
            "RISK_EXCEEDED" => Some(ReasonCode::RiskExceeded),
            "CAPITAL_EXCEEDED" => Some(ReasonCode::CapitalExceeded),
            "DAILY_LOSS_LIMIT" => Some(ReasonCode::DailyLossLimit),
            "CONSECUTIVE_LOSS_LIMIT" => Some(ReasonCode::ConsecutiveLossLimit),
            "CONCENTRATION_EXCEEDED" => Some(ReasonCode::ConcentrationExceeded),
            "INVALID_LEG" => Some(ReasonCode::InvalidLeg),
            "BROKER_UNAVAILABLE" => Some(ReasonCode::BrokerUnavailable),
            "BROKER_REJECTED" => Some(ReasonCode::BrokerRejected),
            _ => None,
        }
    }

    /// True for the policy taxonomy (the codes a REJECTED record may carry).
    pub fn is_policy(&self) -> bool {
        Self::POLICY.contains(self)
    }

    /// Short human description, independent of the per-order detail message.
    pub fn describe(&self) -> &'static str {
        match self {
            ReasonCode::EmergencyStop => "emergency stop is set; all trading halted",
            ReasonCode::CircuitBreakerActive => {
                "drawdown circuit breaker is triggered; manual reset required"
            }
            ReasonCode::RiskExceeded => "order max risk exceeds per-trade risk limit",
            ReasonCode::CapitalExceeded => "order capital exceeds per-trade capital limit",
            ReasonCode::DailyLossLimit => "order worst case would breach the daily loss limit",
            ReasonCode::ConsecutiveLossLimit => "consecutive losing trades limit reached",
            ReasonCode::ConcentrationExceeded => {
                "post-trade symbol concentration exceeds portfolio limit"
            }
            ReasonCode::InvalidLeg => "order legs are structurally invalid",
            ReasonCode::BrokerUnavailable => "broker unreachable or timed out",
            ReasonCode::BrokerRejected => "broker refused the order",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured rejection: stable code plus a human-readable detail message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: ReasonCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
