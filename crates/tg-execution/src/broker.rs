//! Broker boundary.
//!
//! Both processes talk to the venue only through [`BrokerAdapter`]. Every
//! request carries a client order id so a retried placement is idempotent at
//! the broker.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tg_schemas::{Action, ContractDescriptor, FillReport, ReasonCode, OPTION_CONTRACT_MULTIPLIER};

/// Infrastructure failure at the broker boundary. Never a policy decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker rejected order: {0}")]
    Rejected(String),
}

impl BrokerError {
    /// Unavailable and timeout are worth another attempt; a rejection is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BrokerError::Rejected(_))
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            BrokerError::Unavailable(_) | BrokerError::Timeout(_) => ReasonCode::BrokerUnavailable,
            BrokerError::Rejected(_) => ReasonCode::BrokerRejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Net liquidation value, micros.
    pub account_value_micros: i64,
    pub buying_power_micros: i64,
}

/// Open position as reported by the broker. `quantity` is signed
/// (+long, -short), in contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub contract: ContractDescriptor,
    pub quantity: i64,
    /// Current per-share mark, micros.
    pub mark_price_micros: i64,
}

impl BrokerPosition {
    pub fn contract_symbol(&self) -> String {
        self.contract.occ_symbol()
    }

    /// Gross market value of the position, micros (unsigned).
    pub fn market_value_micros(&self) -> i128 {
        self.quantity.unsigned_abs() as i128
            * self.mark_price_micros as i128
            * OPTION_CONTRACT_MULTIPLIER as i128
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLegRequest {
    pub action: Action,
    pub contract: ContractDescriptor,
    pub quantity: i64,
    pub limit_price_micros: i64,
}

/// One broker order. A single-leg order has one entry in `legs`; an atomic
/// multi-leg order carries all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub client_order_id: String,
    pub legs: Vec<OrderLegRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerOrderStatus {
    /// Working at the venue, nothing executed yet.
    Accepted,
    Filled,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderAck {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub status: BrokerOrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub broker_order_id: String,
    pub client_order_id: String,
    pub legs: Vec<OrderLegRequest>,
    pub status: BrokerOrderStatus,
}

/// Venue connection owned by exactly one process.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Connection identity; the trader and the watchdog must differ.
    fn client_id(&self) -> &str;

    fn supports_atomic_multileg(&self) -> bool;

    async fn account(&self) -> Result<AccountSnapshot, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Orders still working at the venue.
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, BrokerError>;

    /// Placing the same `client_order_id` twice returns the first ack.
    async fn place_order(&self, req: &PlaceOrderRequest) -> Result<PlaceOrderAck, BrokerError>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Executions on this connection's orders. May repeat earlier fills;
    /// consumers de-duplicate by fill id.
    async fn fills(&self) -> Result<Vec<FillReport>, BrokerError> {
        Ok(Vec::new())
    }
}
